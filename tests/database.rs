//! Runs against a throwaway Postgres database named by `TEST_DATABASE_URL`.
//! The `public` schema is dropped and rebuilt from the migrations before
//! every test. Without the variable these tests return immediately.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use campus_club_hub::{
    auth, chatbot::ChatBackend, config::Config, connect_to_db, email::Mailer, schema::*, DbPool,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection};
use tokio::sync::{Mutex, MutexGuard};
use tower::ServiceExt;

const JWT_SECRET: &str = "dGVzdC1zZWNyZXQtZm9yLXVuaXQtdGVzdHM=";

const MIGRATIONS: [&str; 2] = [
    include_str!("../migrations/2022-11-20-000000_create_club_hub/up.sql"),
    include_str!("../migrations/2022-11-27-000000_create_badges/up.sql"),
];

lazy_static::lazy_static! {
    static ref DATABASE: Mutex<()> = Mutex::new(());
}

struct TestDb {
    pool: DbPool,
    app: Router,
    _guard: MutexGuard<'static, ()>,
}

async fn setup() -> Option<TestDb> {
    let Ok(db_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL is not set, skipping");
        return None;
    };
    let guard = DATABASE.lock().await;
    std::env::set_var("JWT_SECRET", JWT_SECRET);

    let pool = connect_to_db(&db_url).unwrap();
    {
        let conn = &mut pool.get().await.unwrap();
        conn.batch_execute("DROP SCHEMA public CASCADE; CREATE SCHEMA public;")
            .await
            .unwrap();
        for sql in MIGRATIONS {
            conn.batch_execute(sql).await.unwrap();
        }
    }

    let config = Config {
        db_url,
        port: 0,
        frontend_host: "http://localhost:3000".to_string(),
        media_root: std::env::temp_dir()
            .join("campus-club-hub-db-tests")
            .to_string_lossy()
            .into_owned(),
        smtp_relay: "localhost".to_string(),
        email_username: None,
        email_password: None,
        chatbot_api_key: None,
        chatbot_api_url: "http://127.0.0.1:1/v1/chat/completions".to_string(),
        chatbot_model: "test".to_string(),
    };
    let mailer = Mailer::disabled(config.frontend_host.clone());
    let app = campus_club_hub::app(config, pool.clone(), mailer, ChatBackend::default());

    Some(TestDb {
        pool,
        app,
        _guard: guard,
    })
}

async fn create_user(conn: &mut AsyncPgConnection, username: &str, is_staff: bool) -> i32 {
    diesel::insert_into(users::table)
        .values((
            users::username.eq(username),
            users::email.eq(format!("{username}@example.org")),
            users::password_hash.eq("not-a-real-hash"),
            users::is_staff.eq(is_staff),
        ))
        .returning(users::id)
        .get_result::<i32>(conn)
        .await
        .unwrap()
}

async fn create_club(conn: &mut AsyncPgConnection, name: &str, responsible_id: i32) -> i32 {
    diesel::insert_into(clubs::table)
        .values((
            clubs::name.eq(name),
            clubs::responsible_id.eq(Some(responsible_id)),
        ))
        .returning(clubs::id)
        .get_result::<i32>(conn)
        .await
        .unwrap()
}

impl TestDb {
    async fn send(&self, method: Method, uri: &str, user_id: i32) -> (StatusCode, serde_json::Value) {
        let token = auth::generate_jwt(user_id, auth::TOKEN_LIFETIME).unwrap();
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = self.app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }
}

#[tokio::test]
async fn leaving_a_private_club_hides_its_notifications_everywhere() {
    let Some(db) = setup().await else { return };
    let conn = &mut db.pool.get().await.unwrap();

    let author = create_user(conn, "author", false).await;
    let member = create_user(conn, "member", false).await;
    let club = create_club(conn, "Chess", author).await;
    diesel::insert_into(memberships::table)
        .values((memberships::user_id.eq(member), memberships::club_id.eq(club)))
        .execute(conn)
        .await
        .unwrap();
    let forum = diesel::insert_into(forums::table)
        .values((
            forums::title.eq("Chess members"),
            forums::description.eq(""),
            forums::visibility.eq("private"),
            forums::club_id.eq(Some(club)),
            forums::created_by.eq(author),
        ))
        .returning(forums::id)
        .get_result::<i32>(conn)
        .await
        .unwrap();
    let thread = diesel::insert_into(threads::table)
        .values((
            threads::forum_id.eq(forum),
            threads::title.eq("Tournament"),
            threads::body.eq("Who is in?"),
            threads::author_id.eq(author),
        ))
        .returning(threads::id)
        .get_result::<i32>(conn)
        .await
        .unwrap();
    let notification = diesel::insert_into(notifications::table)
        .values((
            notifications::recipient_id.eq(member),
            notifications::actor_id.eq(Some(author)),
            notifications::kind.eq("reply"),
            notifications::message.eq("author replied"),
            notifications::thread_id.eq(Some(thread)),
        ))
        .returning(notifications::id)
        .get_result::<i32>(conn)
        .await
        .unwrap();

    let (_, count) = db.send(Method::GET, "/api/notifications/unread-count", member).await;
    assert_eq!(count["count"], 1);

    diesel::update(memberships::table.filter(memberships::user_id.eq(member)))
        .set(memberships::active.eq(false))
        .execute(conn)
        .await
        .unwrap();

    let (_, list) = db.send(Method::GET, "/api/notifications", member).await;
    assert_eq!(list, serde_json::json!([]));
    let (_, count) = db.send(Method::GET, "/api/notifications/unread-count", member).await;
    assert_eq!(count["count"], 0);
    let (status, _) = db
        .send(Method::POST, &format!("/api/notifications/{notification}/read"), member)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_an_account_releases_the_clubs_it_led() {
    let Some(db) = setup().await else { return };
    let conn = &mut db.pool.get().await.unwrap();

    let leader = create_user(conn, "leader", false).await;
    let club = create_club(conn, "Robotics", leader).await;

    let (status, _) = db.send(Method::DELETE, "/api/account/me", leader).await;
    assert_eq!(status, StatusCode::OK);

    let responsible = clubs::table
        .find(club)
        .select(clubs::responsible_id)
        .first::<Option<i32>>(conn)
        .await
        .unwrap();
    assert_eq!(responsible, None);

    let (status, _) = db.send(Method::GET, "/api/account/me", leader).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn validating_twice_notifies_the_submitter_once() {
    let Some(db) = setup().await else { return };
    let conn = &mut db.pool.get().await.unwrap();

    let staff = create_user(conn, "staff", true).await;
    let student = create_user(conn, "student", false).await;
    let category = diesel::insert_into(categories::table)
        .values(categories::name.eq("Cours"))
        .returning(categories::id)
        .get_result::<i32>(conn)
        .await
        .unwrap();
    let resource = diesel::insert_into(resources::table)
        .values((
            resources::title.eq("Algèbre"),
            resources::description.eq("Notes de cours"),
            resources::file_path.eq("resources/notes.pdf"),
            resources::category_id.eq(category),
            resources::submitted_by.eq(student),
        ))
        .returning(resources::id)
        .get_result::<i32>(conn)
        .await
        .unwrap();

    let uri = format!("/api/resources/{resource}/validate");
    let (status, first) = db.send(Method::POST, &uri, staff).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["isValidated"], true);
    let (status, _) = db.send(Method::POST, &uri, staff).await;
    assert_eq!(status, StatusCode::OK);

    let sent = notifications::table
        .filter(notifications::recipient_id.eq(student))
        .filter(notifications::kind.eq("validation"))
        .count()
        .get_result::<i64>(conn)
        .await
        .unwrap();
    assert_eq!(sent, 1);
}

#[tokio::test]
async fn history_keeps_left_clubs_and_lists_badges() {
    let Some(db) = setup().await else { return };
    let conn = &mut db.pool.get().await.unwrap();

    let leader = create_user(conn, "leader", false).await;
    let student = create_user(conn, "student", false).await;
    let chess = create_club(conn, "Chess", leader).await;
    diesel::insert_into(memberships::table)
        .values((
            memberships::user_id.eq(student),
            memberships::club_id.eq(chess),
            memberships::active.eq(false),
        ))
        .execute(conn)
        .await
        .unwrap();
    let badge = diesel::insert_into(badges::table)
        .values(badges::name.eq("Pionnier"))
        .returning(badges::id)
        .get_result::<i32>(conn)
        .await
        .unwrap();
    diesel::insert_into(user_badges::table)
        .values((user_badges::user_id.eq(student), user_badges::badge_id.eq(badge)))
        .execute(conn)
        .await
        .unwrap();

    let (status, history) = db.send(Method::GET, "/api/account/history", student).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["memberships"][0]["clubName"], "Chess");
    assert_eq!(history["memberships"][0]["active"], false);
    assert_eq!(history["badges"][0]["name"], "Pionnier");

    let (_, dashboard) = db.send(Method::GET, "/api/account/dashboard", student).await;
    assert_eq!(dashboard["clubs"], serde_json::json!([]));
    assert_eq!(dashboard["badges"][0]["name"], "Pionnier");

    let (_, me) = db.send(Method::GET, "/api/account/me", student).await;
    assert_eq!(me["badges"].as_array().map(Vec::len), Some(1));
}
