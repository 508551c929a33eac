use axum::Router;

pub mod account;
pub mod admin;
pub mod aid_request;
pub mod auth;
pub mod category;
pub mod chatbot;
pub mod club;
pub mod event;
pub mod forum;
pub mod notification;
pub mod password;
pub mod resource;
pub mod survey;
pub mod thread;
pub mod upload;

pub fn app() -> Router {
    Router::new()
        .nest("/auth", auth::app())
        .nest("/password", password::app())
        .nest("/account", account::app())
        .nest("/clubs", club::app())
        .nest("/events", event::app())
        .nest("/forums", forum::app())
        .nest("/threads", thread::app())
        .nest("/posts", thread::posts_app())
        .nest("/surveys", survey::app())
        .nest("/notifications", notification::app())
        .nest("/resources", resource::resource::app())
        .nest("/aids", resource::aid::app())
        .nest("/favorites", resource::favorites_app())
        .nest("/aid-requests", aid_request::app())
        .nest("/categories", category::app())
        .nest("/uploads", upload::app())
        .nest("/chatbot", chatbot::app())
        .nest("/admin", admin::app())
}

/// `ILIKE` pattern matching `needle` anywhere, with wildcards in the needle
/// taken literally.
pub(crate) fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_patterns_escape_wildcards() {
        assert_eq!(contains_pattern("chess"), "%chess%");
        assert_eq!(contains_pattern("100%_off"), "%100\\%\\_off%");
    }
}
