use crate::{
    access,
    auth::CurrentUser,
    error::{AppError, AppResult},
    models::Notification,
    rules::Viewer,
    schema::*,
    DbPool,
};
use axum::{
    extract::{Path, Query},
    routing::{get, post},
    Extension, Json, Router,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Forums behind the threads and surveys notifications point at, and
/// which of those forums the recipient can still read.
#[derive(Default)]
struct ForumFilter {
    thread_forums: HashMap<i32, i32>,
    survey_forums: HashMap<i32, i32>,
    readable: HashSet<i32>,
}

impl ForumFilter {
    async fn load(
        conn: &mut AsyncPgConnection,
        viewer: &Viewer,
        notifications: &[Notification],
    ) -> QueryResult<Self> {
        let thread_forums = threads::table
            .filter(threads::id.eq_any(notifications.iter().filter_map(|n| n.thread_id)))
            .select((threads::id, threads::forum_id))
            .load::<(i32, i32)>(conn)
            .await?
            .into_iter()
            .collect();
        let survey_forums = surveys::table
            .filter(surveys::id.eq_any(notifications.iter().filter_map(|n| n.survey_id)))
            .select((surveys::id, surveys::forum_id))
            .load::<(i32, i32)>(conn)
            .await?
            .into_iter()
            .collect();
        let readable = access::visible_forums(conn, Some(viewer))
            .await?
            .select(forums::id)
            .load::<i32>(conn)
            .await?
            .into_iter()
            .collect();

        Ok(ForumFilter {
            thread_forums,
            survey_forums,
            readable,
        })
    }

    fn forum_of(&self, n: &Notification) -> Option<i32> {
        n.thread_id
            .and_then(|id| self.thread_forums.get(&id))
            .or_else(|| n.survey_id.and_then(|id| self.survey_forums.get(&id)))
            .copied()
    }

    /// Notifications without a forum behind them are always shown.
    fn shows(&self, n: &Notification) -> bool {
        self.forum_of(n)
            .map_or(true, |forum_id| self.readable.contains(&forum_id))
    }

    fn retain(&self, notifications: Vec<Notification>) -> Vec<Notification> {
        notifications.into_iter().filter(|n| self.shows(n)).collect()
    }
}

async fn load_visible(
    conn: &mut AsyncPgConnection,
    viewer: &Viewer,
    unread_only: bool,
) -> AppResult<Vec<Notification>> {
    let mut query = notifications::table
        .filter(notifications::recipient_id.eq(viewer.id))
        .into_boxed();
    if unread_only {
        query = query.filter(notifications::read.eq(false));
    }
    let notifications = query
        .order((notifications::created_at.desc(), notifications::id.desc()))
        .load::<Notification>(conn)
        .await?;

    let filter = ForumFilter::load(conn, viewer, &notifications).await?;
    Ok(filter.retain(notifications))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    unread: bool,
}

/// Own notifications, newest first. Notifications about threads or surveys
/// in forums the user can no longer read are left out.
async fn list(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Query(q): Query<ListQuery>,
) -> AppResult<Json<Vec<Notification>>> {
    let conn = &mut pool.get().await?;
    Ok(Json(load_visible(conn, &user.viewer(), q.unread).await?))
}

#[derive(Serialize)]
struct UnreadCount {
    count: usize,
}

/// Counts exactly what `list?unread=true` would return.
async fn unread_count(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
) -> AppResult<Json<UnreadCount>> {
    let conn = &mut pool.get().await?;
    let count = load_visible(conn, &user.viewer(), true).await?.len();
    Ok(Json(UnreadCount { count }))
}

async fn mark_read(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(notification_id): Path<i32>,
) -> AppResult<Json<Notification>> {
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let not_found = || AppError::not_found("the notification does not exist");
    let notification = notifications::table
        .find(notification_id)
        .filter(notifications::recipient_id.eq(viewer.id))
        .first::<Notification>(conn)
        .await
        .optional()?
        .ok_or_else(not_found)?;
    let filter = ForumFilter::load(conn, &viewer, std::slice::from_ref(&notification)).await?;
    if !filter.shows(&notification) {
        return Err(not_found());
    }

    let notification = diesel::update(notifications::table.find(notification.id))
        .set(notifications::read.eq(true))
        .get_result::<Notification>(conn)
        .await?;

    Ok(Json(notification))
}

async fn mark_all_read(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<UnreadCount>> {
    let conn = &mut pool.get().await?;

    diesel::update(
        notifications::table
            .filter(notifications::recipient_id.eq(user.id))
            .filter(notifications::read.eq(false)),
    )
    .set(notifications::read.eq(true))
    .execute(conn)
    .await?;

    Ok(Json(UnreadCount { count: 0 }))
}

pub fn app() -> Router {
    Router::new()
        .route("/", get(list))
        .route("/unread-count", get(unread_count))
        .route("/read-all", post(mark_all_read))
        .route("/:notification_id/read", post(mark_read))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn notification(id: i32, thread_id: Option<i32>, survey_id: Option<i32>) -> Notification {
        Notification {
            id,
            recipient_id: 1,
            actor_id: Some(2),
            kind: "reply".to_string(),
            message: String::new(),
            read: false,
            thread_id,
            post_id: None,
            survey_id,
            option_id: None,
            resource_id: None,
            aid_id: None,
            created_at: Utc::now(),
        }
    }

    fn filter() -> ForumFilter {
        // thread 10 and survey 20 live in forum 5, which is readable;
        // thread 11 and survey 21 live in private forum 6, which is not.
        ForumFilter {
            thread_forums: HashMap::from([(10, 5), (11, 6)]),
            survey_forums: HashMap::from([(20, 5), (21, 6)]),
            readable: HashSet::from([5]),
        }
    }

    #[test]
    fn notifications_from_unreadable_forums_are_hidden() {
        let filter = filter();
        assert!(filter.shows(&notification(1, Some(10), None)));
        assert!(filter.shows(&notification(2, None, Some(20))));
        assert!(!filter.shows(&notification(3, Some(11), None)));
        assert!(!filter.shows(&notification(4, None, Some(21))));
    }

    #[test]
    fn notifications_without_a_forum_are_kept() {
        let filter = filter();
        assert!(filter.shows(&notification(1, None, None)));
        assert!(ForumFilter::default().shows(&notification(2, None, None)));
    }

    #[test]
    fn count_and_listing_agree_after_losing_access() {
        let kept = filter().retain(vec![
            notification(1, Some(10), None),
            notification(2, Some(11), None),
            notification(3, None, Some(21)),
            notification(4, None, None),
        ]);
        assert_eq!(kept.iter().map(|n| n.id).collect::<Vec<_>>(), vec![1, 4]);
    }
}
