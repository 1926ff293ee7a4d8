//! # rf-api
//!
//! The web routing and orchestration layer for Rusty-Forum.

pub mod accounts;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod session;

pub use error::WebError;
pub use handlers::AppState;

use axum::response::Redirect;
use axum::routing::{get, post};
use axum::Router;
use tower_sessions::{MemoryStore, SessionManagerLayer};

/// Builds the full application router.
///
/// # Developer Note
/// The session layer is passed in so the binary owns cookie policy
/// (name, Secure flag) while tests can use a bare in-memory store.
pub fn router(state: AppState, sessions: SessionManagerLayer<MemoryStore>) -> Router {
    let routes = Router::new()
        .route("/", get(|| async { Redirect::to("/topics/") }))
        // Topics
        .route("/topics/", get(handlers::topics_index))
        .route("/topics/new", get(handlers::new_topic_form).post(handlers::create_topic))
        .route("/topic/{id}/", get(handlers::topic_page))
        .route("/topic/{id}/edit", post(handlers::rename_topic))
        .route("/topic/{id}/new", get(handlers::new_thread_form))
        // Posts and votes
        .route("/posts/new/", post(handlers::create_post))
        .route("/posts/{id}/", get(handlers::post_page))
        .route("/posts/{id}/delete", post(handlers::delete_post))
        .route("/vote/{id}/", post(handlers::vote))
        // Users and accounts
        .route("/user/edit/", get(accounts::edit_user_form).post(accounts::edit_user))
        .route("/user/{id}/", get(accounts::user_page))
        .route("/signup/", get(accounts::signup_form).post(accounts::signup))
        .route("/accounts/login/", get(accounts::login_form).post(accounts::login))
        .route("/accounts/logout/", get(accounts::logout).post(accounts::logout))
        .fallback(handlers::not_found)
        .layer(sessions)
        .with_state(state);

    middleware::standard_middleware(routes)
}
