//! Shared documents (resources) and aids.
//!
//! Both kinds follow the same moderation flow: organizers submit, staff
//! validate or reject, and everyone but staff only ever sees validated
//! items. The handlers are generated once per table by [`library_api`].

use super::contains_pattern;
use crate::{
    access::{self, require},
    auth::{CurrentUser, MaybeUser},
    error::{self, AppError, AppResult},
    models::{Aid, Favorite, Resource},
    notify::{self, NewNotification, NotificationKind},
    rules::{
        favorite::{FavoriteKind, FavoriteTarget},
        Viewer,
    },
    schema::*,
    uploads::{self, UploadKind},
    DbPool,
};
use axum::{
    extract::Query,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::{dsl::exists, prelude::*};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// File reference columns: mandatory for resources, optional for aids.
trait StoredFile {
    fn is_stored(&self, kind: UploadKind) -> bool;
    fn url(&self) -> Option<String>;
}

impl StoredFile for String {
    fn is_stored(&self, kind: UploadKind) -> bool {
        uploads::is_stored_path(kind, self)
    }

    fn url(&self) -> Option<String> {
        Some(uploads::media_url(self))
    }
}

impl StoredFile for Option<String> {
    fn is_stored(&self, kind: UploadKind) -> bool {
        self.as_deref()
            .map_or(true, |path| uploads::is_stored_path(kind, path))
    }

    fn url(&self) -> Option<String> {
        self.as_deref().map(uploads::media_url)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemDetail<T> {
    #[serde(flatten)]
    item: T,
    file_url: Option<String>,
    is_favorite: bool,
}

#[derive(Deserialize)]
struct ListQuery {
    q: Option<String>,
    category: Option<i32>,
    club: Option<i32>,
}

fn require_staff(viewer: &Viewer) -> AppResult<()> {
    require(viewer.is_moderator(), "staff access required")
}

async fn require_organizer(conn: &mut AsyncPgConnection, viewer: &Viewer) -> AppResult<()> {
    let responsible = access::is_responsible_of_any_club(conn, viewer.id).await?;
    require(
        viewer.is_organizer(responsible),
        "only organizers can submit documents",
    )
}

async fn check_references(
    conn: &mut AsyncPgConnection,
    category_id: Option<i32>,
    club_id: Option<i32>,
) -> AppResult<()> {
    if let Some(category_id) = category_id {
        let found = diesel::select(exists(categories::table.find(category_id)))
            .get_result::<bool>(conn)
            .await?;
        if !found {
            return Err(AppError::invalid_field("category_id", "unknown category"));
        }
    }
    if let Some(club_id) = club_id {
        let found = diesel::select(exists(clubs::table.find(club_id)))
            .get_result::<bool>(conn)
            .await?;
        if !found {
            return Err(AppError::invalid_field("club_id", "unknown club"));
        }
    }
    Ok(())
}

async fn find_favorite(
    conn: &mut AsyncPgConnection,
    user_id: i32,
    target: FavoriteTarget,
) -> QueryResult<Option<i32>> {
    let query = favorites::table
        .filter(favorites::user_id.eq(user_id))
        .select(favorites::id)
        .into_boxed();
    let query = match target {
        FavoriteTarget::Resource(id) => query.filter(favorites::resource_id.eq(id)),
        FavoriteTarget::Aid(id) => query.filter(favorites::aid_id.eq(id)),
    };
    query.first::<i32>(conn).await.optional()
}

/// Adds the favorite, or removes it when it already exists. Returns whether
/// the item is a favorite afterwards.
async fn toggle_favorite(
    conn: &mut AsyncPgConnection,
    user_id: i32,
    target: FavoriteTarget,
) -> AppResult<bool> {
    #[derive(Insertable)]
    #[diesel(table_name = favorites)]
    struct NewFavorite {
        user_id: i32,
        resource_id: Option<i32>,
        aid_id: Option<i32>,
    }

    if let Some(id) = find_favorite(conn, user_id, target).await? {
        diesel::delete(favorites::table.find(id))
            .execute(conn)
            .await?;
        return Ok(false);
    }

    let (resource_id, aid_id) = target.columns();
    diesel::insert_into(favorites::table)
        .values(NewFavorite {
            user_id,
            resource_id,
            aid_id,
        })
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    Ok(true)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteState {
    is_favorite: bool,
}

macro_rules! library_api {
    (
        $module:ident,
        table: $table:ident,
        model: $model:ty,
        file: $file:ty,
        upload: $upload:expr,
        target: $target:path,
        notify_field: $notify_field:ident,
        label: $label:literal $(,)?
    ) => {
        pub mod $module {
            use super::*;
            use axum::{extract::Path, routing::post};
            use validator::Validate;

            async fn load(
                conn: &mut AsyncPgConnection,
                id: i32,
                viewer: Option<&Viewer>,
            ) -> AppResult<$model> {
                let item = $table::table
                    .find(id)
                    .first::<$model>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::not_found(concat!("the ", $label, " does not exist")))?;
                let staff = viewer.map_or(false, Viewer::is_moderator);
                require(
                    item.is_validated || staff,
                    concat!("this ", $label, " is awaiting validation"),
                )?;
                Ok(item)
            }

            async fn list(
                Extension(pool): Extension<DbPool>,
                viewer: MaybeUser,
                Query(q): Query<ListQuery>,
            ) -> AppResult<Json<Vec<$model>>> {
                let staff = viewer.viewer().map_or(false, |v| v.is_moderator());
                let conn = &mut pool.get().await?;

                let mut query = $table::table.into_boxed();
                if !staff {
                    query = query.filter($table::is_validated.eq(true));
                }
                if let Some(search) = q.q.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                    query = query.filter($table::title.ilike(contains_pattern(search)));
                }
                if let Some(category_id) = q.category {
                    query = query.filter($table::category_id.eq(category_id));
                }
                if let Some(club_id) = q.club {
                    query = query.filter($table::club_id.eq(club_id));
                }

                let items = query
                    .order($table::submitted_at.desc())
                    .load::<$model>(conn)
                    .await?;
                Ok(Json(items))
            }

            async fn info(
                Extension(pool): Extension<DbPool>,
                viewer: MaybeUser,
                Path(id): Path<i32>,
            ) -> AppResult<Json<ItemDetail<$model>>> {
                let viewer = viewer.viewer();
                let conn = &mut pool.get().await?;

                let item = load(conn, id, viewer.as_ref()).await?;
                let is_favorite = match viewer {
                    Some(v) => find_favorite(conn, v.id, $target(id)).await?.is_some(),
                    None => false,
                };

                Ok(Json(ItemDetail {
                    file_url: item.file_path.url(),
                    item,
                    is_favorite,
                }))
            }

            #[derive(Deserialize, Validate)]
            #[serde(rename_all = "camelCase")]
            struct NewItemRequest {
                #[validate(length(min = 1, max = 200))]
                title: String,
                #[serde(default)]
                description: String,
                file_path: $file,
                category_id: i32,
                club_id: Option<i32>,
            }

            async fn create(
                Extension(pool): Extension<DbPool>,
                user: CurrentUser,
                Json(req): Json<NewItemRequest>,
            ) -> AppResult<Json<$model>> {
                #[derive(Insertable)]
                #[diesel(table_name = $table)]
                struct NewItem {
                    title: String,
                    description: String,
                    file_path: $file,
                    category_id: i32,
                    club_id: Option<i32>,
                    submitted_by: i32,
                    is_validated: bool,
                }

                error::validate(&req)?;
                if !req.file_path.is_stored($upload) {
                    return Err(AppError::invalid_field("file_path", "upload the file first"));
                }
                let viewer = user.viewer();
                let conn = &mut pool.get().await?;

                require_organizer(conn, &viewer).await?;
                check_references(conn, Some(req.category_id), req.club_id).await?;

                let item = diesel::insert_into($table::table)
                    .values(NewItem {
                        title: req.title.trim().to_string(),
                        description: req.description,
                        file_path: req.file_path,
                        category_id: req.category_id,
                        club_id: req.club_id,
                        submitted_by: viewer.id,
                        is_validated: viewer.is_moderator(),
                    })
                    .get_result::<$model>(conn)
                    .await?;

                tracing::info!(
                    id = item.id,
                    kind = $label,
                    by = viewer.id,
                    validated = item.is_validated,
                    "submitted item"
                );
                Ok(Json(item))
            }

            #[derive(Deserialize, Validate)]
            #[serde(rename_all = "camelCase")]
            struct ItemUpdateRequest {
                #[validate(length(min = 1, max = 200))]
                title: Option<String>,
                description: Option<String>,
                file_path: Option<$file>,
                category_id: Option<i32>,
                club_id: Option<i32>,
            }

            #[derive(AsChangeset)]
            #[diesel(table_name = $table)]
            struct ItemEdit {
                title: Option<String>,
                description: Option<String>,
                file_path: Option<$file>,
                category_id: Option<i32>,
                club_id: Option<i32>,
            }

            impl ItemEdit {
                fn is_empty(&self) -> bool {
                    self.title.is_none()
                        && self.description.is_none()
                        && self.file_path.is_none()
                        && self.category_id.is_none()
                        && self.club_id.is_none()
                }
            }

            async fn edit(
                Extension(pool): Extension<DbPool>,
                user: CurrentUser,
                Path(id): Path<i32>,
                Json(req): Json<ItemUpdateRequest>,
            ) -> AppResult<Json<$model>> {
                error::validate(&req)?;
                let viewer = user.viewer();
                require_staff(&viewer)?;
                if let Some(file_path) = &req.file_path {
                    if !file_path.is_stored($upload) {
                        return Err(AppError::invalid_field("file_path", "upload the file first"));
                    }
                }
                let conn = &mut pool.get().await?;

                let item = load(conn, id, Some(&viewer)).await?;
                check_references(conn, req.category_id, req.club_id).await?;

                let changes = ItemEdit {
                    title: req.title.map(|t| t.trim().to_string()),
                    description: req.description,
                    file_path: req.file_path,
                    category_id: req.category_id,
                    club_id: req.club_id,
                };
                if changes.is_empty() {
                    return Ok(Json(item));
                }

                let item = diesel::update($table::table.find(id))
                    .set(changes)
                    .get_result::<$model>(conn)
                    .await?;
                Ok(Json(item))
            }

            async fn remove(
                Extension(pool): Extension<DbPool>,
                user: CurrentUser,
                Path(id): Path<i32>,
            ) -> AppResult<()> {
                let viewer = user.viewer();
                require_staff(&viewer)?;
                let conn = &mut pool.get().await?;

                let deleted = diesel::delete($table::table.find(id))
                    .execute(conn)
                    .await?;
                if deleted == 0 {
                    return Err(AppError::not_found(concat!("the ", $label, " does not exist")));
                }
                Ok(())
            }

            async fn validate(
                Extension(pool): Extension<DbPool>,
                user: CurrentUser,
                Path(id): Path<i32>,
            ) -> AppResult<Json<$model>> {
                let viewer = user.viewer();
                require_staff(&viewer)?;
                let conn = &mut pool.get().await?;

                let validated = diesel::update(
                    $table::table
                        .find(id)
                        .filter($table::is_validated.eq(false)),
                )
                .set($table::is_validated.eq(true))
                .get_result::<$model>(conn)
                .await
                .optional()?;

                // Already validated: nothing changes and nobody is notified again.
                let Some(item) = validated else {
                    let item = $table::table
                        .find(id)
                        .first::<$model>(conn)
                        .await
                        .optional()?
                        .ok_or_else(|| AppError::not_found(concat!("the ", $label, " does not exist")))?;
                    return Ok(Json(item));
                };

                let mut notification = NewNotification::new(
                    item.submitted_by,
                    NotificationKind::Validation,
                    format!(concat!("Your ", $label, " \"{}\" has been validated."), item.title),
                )
                .from_actor(viewer.id);
                notification.$notify_field = Some(item.id);
                notify::send(conn, notification).await?;

                tracing::info!(id, kind = $label, by = viewer.id, "validated item");
                Ok(Json(item))
            }

            async fn reject(
                Extension(pool): Extension<DbPool>,
                user: CurrentUser,
                Path(id): Path<i32>,
            ) -> AppResult<()> {
                let viewer = user.viewer();
                require_staff(&viewer)?;
                let conn = &mut pool.get().await?;

                let deleted = diesel::delete(
                    $table::table
                        .find(id)
                        .filter($table::is_validated.eq(false)),
                )
                .execute(conn)
                .await?;
                if deleted == 0 {
                    return Err(AppError::not_found(concat!("no pending ", $label, " with this id")));
                }
                tracing::info!(id, kind = $label, by = viewer.id, "rejected item");
                Ok(())
            }

            async fn favorite(
                Extension(pool): Extension<DbPool>,
                user: CurrentUser,
                Path(id): Path<i32>,
            ) -> AppResult<Json<FavoriteState>> {
                let viewer = user.viewer();
                let conn = &mut pool.get().await?;

                load(conn, id, Some(&viewer)).await?;
                let is_favorite = toggle_favorite(conn, viewer.id, $target(id)).await?;
                Ok(Json(FavoriteState { is_favorite }))
            }

            pub fn app() -> Router {
                Router::new()
                    .route("/", get(list).post(create))
                    .route("/:id", get(info).put(edit).delete(remove))
                    .route("/:id/validate", post(validate))
                    .route("/:id/reject", post(reject))
                    .route("/:id/favorite", post(favorite))
            }
        }
    };
}

library_api!(
    resource,
    table: resources,
    model: Resource,
    file: String,
    upload: UploadKind::Resources,
    target: FavoriteTarget::Resource,
    notify_field: resource_id,
    label: "resource",
);

library_api!(
    aid,
    table: aids,
    model: Aid,
    file: Option<String>,
    upload: UploadKind::Aids,
    target: FavoriteTarget::Aid,
    notify_field: aid_id,
    label: "aid",
);

#[derive(Deserialize)]
struct FavoriteQuery {
    #[serde(rename = "type")]
    kind: Option<FavoriteKind>,
    q: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteResponse {
    id: i32,
    kind: &'static str,
    item_id: i32,
    title: String,
    created_at: DateTime<Utc>,
}

async fn list_favorites(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<FavoriteQuery>,
) -> AppResult<Json<Vec<FavoriteResponse>>> {
    let conn = &mut pool.get().await?;

    let favorites = favorites::table
        .filter(favorites::user_id.eq(user.id))
        .order(favorites::created_at.desc())
        .load::<Favorite>(conn)
        .await?
        .into_iter()
        .filter_map(|f| f.target().map(|target| (f, target)))
        .filter(|(_, target)| q.kind.map_or(true, |kind| kind.matches(*target)))
        .collect::<Vec<_>>();

    let resource_titles = HashMap::<i32, String>::from_iter(
        resources::table
            .filter(resources::id.eq_any(favorites.iter().filter_map(|(f, _)| f.resource_id)))
            .select((resources::id, resources::title))
            .load::<(i32, String)>(conn)
            .await?,
    );
    let aid_titles = HashMap::<i32, String>::from_iter(
        aids::table
            .filter(aids::id.eq_any(favorites.iter().filter_map(|(f, _)| f.aid_id)))
            .select((aids::id, aids::title))
            .load::<(i32, String)>(conn)
            .await?,
    );

    let search = q
        .q
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let favorites = favorites
        .into_iter()
        .filter_map(|(favorite, target)| {
            let (kind, item_id, title) = match target {
                FavoriteTarget::Resource(id) => ("resource", id, resource_titles.get(&id)?),
                FavoriteTarget::Aid(id) => ("aid", id, aid_titles.get(&id)?),
            };
            Some(FavoriteResponse {
                id: favorite.id,
                kind,
                item_id,
                title: title.clone(),
                created_at: favorite.created_at,
            })
        })
        .filter(|f| {
            search
                .as_deref()
                .map_or(true, |s| f.title.to_lowercase().contains(s))
        })
        .collect();

    Ok(Json(favorites))
}

pub fn favorites_app() -> Router {
    Router::new().route("/", get(list_favorites))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aids_may_omit_their_file() {
        let none: Option<String> = None;
        assert!(none.is_stored(UploadKind::Aids));
        assert_eq!(none.url(), None);
        assert!(Some("aids/abc.pdf".to_string()).is_stored(UploadKind::Aids));
        assert!(!Some("resources/abc.pdf".to_string()).is_stored(UploadKind::Aids));
    }

    #[test]
    fn resource_files_must_come_from_uploads() {
        assert!("resources/abc.pdf".to_string().is_stored(UploadKind::Resources));
        assert!(!"/etc/passwd".to_string().is_stored(UploadKind::Resources));
        assert_eq!(
            "resources/abc.pdf".to_string().url().as_deref(),
            Some("/media/resources/abc.pdf")
        );
    }
}
