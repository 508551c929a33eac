use crate::schema::*;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub is_active: bool,
    pub email_verified: bool,
    pub date_joined: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(User, foreign_key = responsible_id))]
#[serde(rename_all = "camelCase")]
pub struct Club {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub responsible_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(User))]
#[diesel(belongs_to(Club))]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub id: i32,
    pub user_id: i32,
    pub club_id: i32,
    pub role: String,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(Club))]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i32,
    pub club_id: Option<i32>,
    pub title: String,
    pub description: String,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: String,
    pub visibility: String,
    pub max_participants: i32,
    pub featured: bool,
    pub promotion_image: Option<String>,
    pub promotion_description: Option<String>,
    pub created_by: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(Event))]
#[diesel(belongs_to(User))]
#[serde(rename_all = "camelCase")]
pub struct Participation {
    pub id: i32,
    pub event_id: i32,
    pub user_id: i32,
    pub registered_at: DateTime<Utc>,
    pub attended: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(Club))]
#[serde(rename_all = "camelCase")]
pub struct Forum {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub visibility: String,
    pub club_id: Option<i32>,
    pub created_by: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(Forum))]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: i32,
    pub forum_id: i32,
    pub title: String,
    pub body: String,
    pub author_id: i32,
    pub is_pinned: bool,
    pub is_closed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(Thread))]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i32,
    pub thread_id: i32,
    pub content: String,
    pub author_id: i32,
    pub is_modified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(Forum))]
#[serde(rename_all = "camelCase")]
pub struct Survey {
    pub id: i32,
    pub forum_id: i32,
    pub title: String,
    pub description: String,
    pub author_id: i32,
    pub closes_at: Option<DateTime<Utc>>,
    pub is_closed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(Survey))]
#[diesel(table_name = survey_options)]
#[serde(rename_all = "camelCase")]
pub struct SurveyOption {
    pub id: i32,
    pub survey_id: i32,
    pub text: String,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Survey))]
#[diesel(belongs_to(SurveyOption, foreign_key = option_id))]
#[diesel(table_name = survey_votes)]
pub struct SurveyVote {
    pub id: i32,
    pub survey_id: i32,
    pub option_id: i32,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = categories)]
pub struct Category {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub file_path: String,
    pub category_id: i32,
    pub club_id: Option<i32>,
    pub submitted_by: i32,
    pub submitted_at: DateTime<Utc>,
    pub is_validated: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aid {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub file_path: Option<String>,
    pub category_id: i32,
    pub club_id: Option<i32>,
    pub submitted_by: i32,
    pub submitted_at: DateTime<Utc>,
    pub is_validated: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AidRequest {
    pub id: i32,
    pub kind: String,
    pub description: String,
    pub requested_by: i32,
    pub status: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct Favorite {
    pub id: i32,
    pub user_id: i32,
    pub resource_id: Option<i32>,
    pub aid_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i32,
    pub recipient_id: i32,
    pub actor_id: Option<i32>,
    pub kind: String,
    pub message: String,
    pub read: bool,
    pub thread_id: Option<i32>,
    pub post_id: Option<i32>,
    pub survey_id: Option<i32>,
    pub option_id: Option<i32>,
    pub resource_id: Option<i32>,
    pub aid_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
pub struct Badge {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub icon: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Badge))]
#[diesel(belongs_to(User))]
pub struct UserBadge {
    pub id: i32,
    pub user_id: i32,
    pub badge_id: i32,
    pub awarded_at: DateTime<Utc>,
}
