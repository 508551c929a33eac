use crate::schema::notifications;
use diesel::{prelude::*, Insertable};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Reply,
    Vote,
    Validation,
    Request,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Reply => "reply",
            NotificationKind::Vote => "vote",
            NotificationKind::Validation => "validation",
            NotificationKind::Request => "request",
        }
    }
}

#[derive(Insertable, Default)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub recipient_id: i32,
    pub actor_id: Option<i32>,
    pub kind: String,
    pub message: String,
    pub thread_id: Option<i32>,
    pub post_id: Option<i32>,
    pub survey_id: Option<i32>,
    pub option_id: Option<i32>,
    pub resource_id: Option<i32>,
    pub aid_id: Option<i32>,
}

impl NewNotification {
    pub fn new(recipient_id: i32, kind: NotificationKind, message: impl Into<String>) -> Self {
        NewNotification {
            recipient_id,
            kind: kind.as_str().to_string(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn from_actor(mut self, actor_id: i32) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    /// Users are never notified about their own actions.
    pub fn is_self_notification(&self) -> bool {
        self.actor_id == Some(self.recipient_id)
    }
}

pub async fn send(conn: &mut AsyncPgConnection, notification: NewNotification) -> QueryResult<()> {
    if notification.is_self_notification() {
        return Ok(());
    }
    tracing::debug!(
        recipient = notification.recipient_id,
        kind = %notification.kind,
        "notifying"
    );
    diesel::insert_into(notifications::table)
        .values(notification)
        .execute(conn)
        .await
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actors_do_not_notify_themselves() {
        let n = NewNotification::new(3, NotificationKind::Vote, "voted").from_actor(3);
        assert!(n.is_self_notification());
        let n = NewNotification::new(3, NotificationKind::Vote, "voted").from_actor(4);
        assert!(!n.is_self_notification());
        let n = NewNotification::new(3, NotificationKind::Validation, "validated");
        assert!(!n.is_self_notification());
        assert_eq!(n.kind, "validation");
    }
}
