use crate::{
    access::require,
    auth::CurrentUser,
    error::{self, AppError, AppResult},
    models::Category,
    schema::*,
    DbPool,
};
use axum::{routing::get, Extension, Json, Router};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use validator::Validate;

async fn list(Extension(pool): Extension<DbPool>) -> AppResult<Json<Vec<Category>>> {
    let conn = &mut pool.get().await?;

    let categories = categories::table
        .order(categories::name.asc())
        .load::<Category>(conn)
        .await?;

    Ok(Json(categories))
}

#[derive(Deserialize, Validate)]
struct NewCategoryRequest {
    #[validate(length(min = 1, max = 100))]
    name: String,
}

async fn create(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Json(req): Json<NewCategoryRequest>,
) -> AppResult<Json<Category>> {
    error::validate(&req)?;
    require(user.viewer().is_moderator(), "staff access required")?;
    let conn = &mut pool.get().await?;

    let category = diesel::insert_into(categories::table)
        .values(categories::name.eq(req.name.trim()))
        .on_conflict(categories::name)
        .do_nothing()
        .get_result::<Category>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::conflict("this category already exists"))?;

    Ok(Json(category))
}

pub fn app() -> Router {
    Router::new().route("/", get(list).post(create))
}
