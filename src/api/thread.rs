//! Threads and their posts. Neither carries permissions of its own: every
//! check resolves the owning forum's capabilities first.

use super::contains_pattern;
use crate::{
    access::{self, require},
    auth::{CurrentUser, MaybeUser},
    error::{self, AppError, AppResult},
    models::{Post, Thread},
    notify::{self, NewNotification, NotificationKind},
    rules::{forum::Capabilities, Viewer},
    schema::*,
    DbPool,
};
use axum::{
    extract::{Path, Query},
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ThreadResponse {
    id: i32,
    forum_id: i32,
    title: String,
    body: String,
    author_id: i32,
    author_name: Option<String>,
    is_pinned: bool,
    is_closed: bool,
    post_count: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

async fn usernames(
    conn: &mut AsyncPgConnection,
    ids: impl IntoIterator<Item = i32>,
) -> QueryResult<HashMap<i32, String>> {
    let ids = ids.into_iter().unique().collect::<Vec<_>>();
    Ok(HashMap::from_iter(
        users::table
            .filter(users::id.eq_any(ids))
            .select((users::id, users::username))
            .load::<(i32, String)>(conn)
            .await?,
    ))
}

async fn load_threads(
    conn: &mut AsyncPgConnection,
    threads: Vec<Thread>,
) -> AppResult<Vec<ThreadResponse>> {
    let thread_ids = threads.iter().map(|t| t.id).collect::<Vec<_>>();
    let post_counts = posts::table
        .filter(posts::thread_id.eq_any(&thread_ids))
        .select(posts::thread_id)
        .load::<i32>(conn)
        .await?
        .into_iter()
        .counts();
    let authors = usernames(conn, threads.iter().map(|t| t.author_id)).await?;

    Ok(threads
        .into_iter()
        .map(|thread| ThreadResponse {
            id: thread.id,
            post_count: post_counts.get(&thread.id).copied().unwrap_or(0),
            author_name: authors.get(&thread.author_id).cloned(),
            forum_id: thread.forum_id,
            title: thread.title,
            body: thread.body,
            author_id: thread.author_id,
            is_pinned: thread.is_pinned,
            is_closed: thread.is_closed,
            created_at: thread.created_at,
            updated_at: thread.updated_at,
        })
        .collect())
}

async fn load_thread_response(
    conn: &mut AsyncPgConnection,
    thread: Thread,
) -> AppResult<ThreadResponse> {
    Ok(load_threads(conn, vec![thread])
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("`load_threads` should return one thread"))?)
}

#[derive(Deserialize)]
pub(super) struct ThreadQuery {
    q: Option<String>,
    forum: Option<i32>,
}

fn filtered(
    mut query: threads::BoxedQuery<'static, diesel::pg::Pg>,
    search: Option<&str>,
) -> threads::BoxedQuery<'static, diesel::pg::Pg> {
    if let Some(q) = search.map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = contains_pattern(q);
        query = query.filter(
            threads::title
                .ilike(pattern.clone())
                .or(threads::body.ilike(pattern)),
        );
    }
    query
        .order(threads::is_pinned.desc())
        .then_order_by(threads::updated_at.desc())
}

/// Threads across every forum the viewer can read.
async fn list(
    Extension(pool): Extension<DbPool>,
    viewer: MaybeUser,
    Query(q): Query<ThreadQuery>,
) -> AppResult<Json<Vec<ThreadResponse>>> {
    let viewer = viewer.viewer();
    let conn = &mut pool.get().await?;

    let forum_ids = access::visible_forums(conn, viewer.as_ref())
        .await?
        .select(forums::id)
        .load::<i32>(conn)
        .await?;

    let mut query = threads::table
        .filter(threads::forum_id.eq_any(forum_ids))
        .into_boxed();
    if let Some(forum_id) = q.forum {
        query = query.filter(threads::forum_id.eq(forum_id));
    }
    let threads = filtered(query, q.q.as_deref())
        .load::<Thread>(conn)
        .await?;

    Ok(Json(load_threads(conn, threads).await?))
}

pub(super) async fn list_in_forum(
    Extension(pool): Extension<DbPool>,
    viewer: MaybeUser,
    Path(forum_id): Path<i32>,
    Query(q): Query<ThreadQuery>,
) -> AppResult<Json<Vec<ThreadResponse>>> {
    let viewer = viewer.viewer();
    let conn = &mut pool.get().await?;

    let ctx = access::load_forum(conn, forum_id, viewer.as_ref()).await?;
    ctx.require_read()?;

    let query = threads::table
        .filter(threads::forum_id.eq(forum_id))
        .into_boxed();
    let threads = filtered(query, q.q.as_deref())
        .load::<Thread>(conn)
        .await?;

    Ok(Json(load_threads(conn, threads).await?))
}

#[derive(Deserialize, Validate)]
pub(super) struct NewThreadRequest {
    #[validate(length(min = 1, max = 200))]
    title: String,
    #[validate(length(min = 1))]
    body: String,
}

pub(super) async fn create(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(forum_id): Path<i32>,
    Json(req): Json<NewThreadRequest>,
) -> AppResult<Json<ThreadResponse>> {
    #[derive(Insertable)]
    #[diesel(table_name = threads)]
    struct NewThread {
        forum_id: i32,
        title: String,
        body: String,
        author_id: i32,
    }

    error::validate(&req)?;
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let ctx = access::load_forum(conn, forum_id, Some(&viewer)).await?;
    ctx.require_write()?;

    let thread = diesel::insert_into(threads::table)
        .values(NewThread {
            forum_id,
            title: req.title.trim().to_string(),
            body: req.body,
            author_id: viewer.id,
        })
        .get_result::<Thread>(conn)
        .await?;

    tracing::debug!(thread_id = thread.id, forum_id, "created thread");
    Ok(Json(load_thread_response(conn, thread).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostResponse {
    id: i32,
    thread_id: i32,
    content: String,
    author_id: i32,
    author_name: Option<String>,
    is_modified: bool,
    can_edit: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PostResponse {
    fn new(post: Post, author_name: Option<String>, caps: &Capabilities, viewer: Option<&Viewer>) -> Self {
        PostResponse {
            can_edit: caps.can_edit_content(viewer, post.author_id),
            author_name,
            id: post.id,
            thread_id: post.thread_id,
            content: post.content,
            author_id: post.author_id,
            is_modified: post.is_modified,
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThreadDetailResponse {
    thread: ThreadResponse,
    posts: Vec<PostResponse>,
    capabilities: Capabilities,
    can_reply: bool,
    can_edit: bool,
}

async fn info(
    Extension(pool): Extension<DbPool>,
    viewer: MaybeUser,
    Path(thread_id): Path<i32>,
) -> AppResult<Json<ThreadDetailResponse>> {
    let viewer = viewer.viewer();
    let conn = &mut pool.get().await?;

    let (thread, ctx) = access::load_thread(conn, thread_id, viewer.as_ref()).await?;
    ctx.require_read()?;

    let posts = posts::table
        .filter(posts::thread_id.eq(thread_id))
        .order(posts::created_at.asc())
        .load::<Post>(conn)
        .await?;
    let authors = usernames(conn, posts.iter().map(|p| p.author_id)).await?;

    let can_reply = viewer.is_some() && ctx.caps.can_reply(thread.is_closed);
    let can_edit = ctx.caps.can_edit_content(viewer.as_ref(), thread.author_id);
    let posts = posts
        .into_iter()
        .map(|post| {
            let name = authors.get(&post.author_id).cloned();
            PostResponse::new(post, name, &ctx.caps, viewer.as_ref())
        })
        .collect();

    Ok(Json(ThreadDetailResponse {
        thread: load_thread_response(conn, thread).await?,
        posts,
        capabilities: ctx.caps,
        can_reply,
        can_edit,
    }))
}

#[derive(Deserialize, Validate)]
struct ThreadUpdateRequest {
    #[validate(length(min = 1, max = 200))]
    title: Option<String>,
    #[validate(length(min = 1))]
    body: Option<String>,
}

async fn edit(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(thread_id): Path<i32>,
    Json(req): Json<ThreadUpdateRequest>,
) -> AppResult<Json<ThreadResponse>> {
    #[derive(AsChangeset)]
    #[diesel(table_name = threads)]
    struct ThreadEdit {
        title: Option<String>,
        body: Option<String>,
        updated_at: DateTime<Utc>,
    }

    error::validate(&req)?;
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let (thread, ctx) = access::load_thread(conn, thread_id, Some(&viewer)).await?;
    require(
        ctx.caps.can_edit_content(Some(&viewer), thread.author_id),
        "you cannot edit this thread",
    )?;

    let thread = diesel::update(threads::table.find(thread_id))
        .set(ThreadEdit {
            title: req.title.map(|t| t.trim().to_string()),
            body: req.body,
            updated_at: Utc::now(),
        })
        .get_result::<Thread>(conn)
        .await?;

    Ok(Json(load_thread_response(conn, thread).await?))
}

async fn remove(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(thread_id): Path<i32>,
) -> AppResult<()> {
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let (thread, ctx) = access::load_thread(conn, thread_id, Some(&viewer)).await?;
    require(
        ctx.caps.can_edit_content(Some(&viewer), thread.author_id),
        "you cannot delete this thread",
    )?;

    diesel::delete(threads::table.find(thread_id))
        .execute(conn)
        .await?;
    Ok(())
}

#[derive(Deserialize)]
struct PinRequest {
    pinned: bool,
}

async fn pin(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(thread_id): Path<i32>,
    Json(req): Json<PinRequest>,
) -> AppResult<Json<ThreadResponse>> {
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let (_, ctx) = access::load_thread(conn, thread_id, Some(&viewer)).await?;
    ctx.require_manage()?;

    let thread = diesel::update(threads::table.find(thread_id))
        .set(threads::is_pinned.eq(req.pinned))
        .get_result::<Thread>(conn)
        .await?;

    Ok(Json(load_thread_response(conn, thread).await?))
}

#[derive(Deserialize)]
struct CloseRequest {
    closed: bool,
}

async fn close(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(thread_id): Path<i32>,
    Json(req): Json<CloseRequest>,
) -> AppResult<Json<ThreadResponse>> {
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let (_, ctx) = access::load_thread(conn, thread_id, Some(&viewer)).await?;
    ctx.require_manage()?;

    let thread = diesel::update(threads::table.find(thread_id))
        .set(threads::is_closed.eq(req.closed))
        .get_result::<Thread>(conn)
        .await?;

    Ok(Json(load_thread_response(conn, thread).await?))
}

#[derive(Deserialize, Validate)]
struct PostRequest {
    #[validate(length(min = 1, max = 10000))]
    content: String,
}

async fn reply(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
    Path(thread_id): Path<i32>,
    Json(req): Json<PostRequest>,
) -> AppResult<Json<Post>> {
    #[derive(Insertable)]
    #[diesel(table_name = posts)]
    struct NewPost {
        thread_id: i32,
        content: String,
        author_id: i32,
    }

    error::validate(&req)?;
    let viewer = Viewer::from(&user);
    let conn = &mut pool.get().await?;

    let (thread, ctx) = access::load_thread(conn, thread_id, Some(&viewer)).await?;
    ctx.require_write()?;
    require(ctx.caps.can_reply(thread.is_closed), "this thread is closed")?;

    let post = diesel::insert_into(posts::table)
        .values(NewPost {
            thread_id,
            content: req.content,
            author_id: viewer.id,
        })
        .get_result::<Post>(conn)
        .await?;
    diesel::update(threads::table.find(thread_id))
        .set(threads::updated_at.eq(Utc::now()))
        .execute(conn)
        .await?;

    let mut notification = NewNotification::new(
        thread.author_id,
        NotificationKind::Reply,
        format!("{} replied to your thread \"{}\"", user.username, thread.title),
    )
    .from_actor(viewer.id);
    notification.thread_id = Some(thread_id);
    notification.post_id = Some(post.id);
    notify::send(conn, notification).await?;

    Ok(Json(post))
}

async fn edit_post(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(post_id): Path<i32>,
    Json(req): Json<PostRequest>,
) -> AppResult<Json<Post>> {
    error::validate(&req)?;
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let (post, _, ctx) = access::load_post(conn, post_id, Some(&viewer)).await?;
    require(
        ctx.caps.can_edit_content(Some(&viewer), post.author_id),
        "you cannot edit this post",
    )?;

    let post = diesel::update(posts::table.find(post_id))
        .set((
            posts::content.eq(req.content),
            posts::is_modified.eq(true),
            posts::updated_at.eq(Utc::now()),
        ))
        .get_result::<Post>(conn)
        .await?;

    Ok(Json(post))
}

async fn remove_post(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(post_id): Path<i32>,
) -> AppResult<()> {
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let (post, _, ctx) = access::load_post(conn, post_id, Some(&viewer)).await?;
    require(
        ctx.caps.can_edit_content(Some(&viewer), post.author_id),
        "you cannot delete this post",
    )?;

    let deleted = diesel::delete(posts::table.find(post_id))
        .execute(conn)
        .await?;
    if deleted == 0 {
        return Err(AppError::not_found("the post does not exist"));
    }
    Ok(())
}

pub fn app() -> Router {
    Router::new()
        .route("/", get(list))
        .route("/:thread_id", get(info).put(edit).delete(remove))
        .route("/:thread_id/pin", put(pin))
        .route("/:thread_id/close", put(close))
        .route("/:thread_id/posts", post(reply))
}

pub fn posts_app() -> Router {
    Router::new().route("/:post_id", put(edit_post).delete(remove_post))
}
