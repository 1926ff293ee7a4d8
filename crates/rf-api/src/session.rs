//! Session-backed identity extractors.
//!
//! The session stores only the user id; every request reloads the user so
//! staff changes and deletions take effect immediately.

use crate::error::WebError;
use crate::handlers::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::Method;
use axum::response::{IntoResponse, Redirect, Response};
use rf_core::{resolve_role, AppError, Id, Role, User};
use rf_ui::Nav;
use tower_sessions::Session;

const USER_KEY: &str = "user_id";

fn session_err(e: tower_sessions::session::Error) -> WebError {
    WebError(AppError::Internal(format!("session error: {e}")))
}

async fn session_user(parts: &mut Parts, state: &AppState) -> Result<Option<User>, WebError> {
    let session = Session::from_request_parts(parts, state)
        .await
        .map_err(|(_, msg)| WebError(AppError::Internal(msg.to_string())))?;

    match session.get::<Id>(USER_KEY).await.map_err(session_err)? {
        Some(id) => Ok(state.forum.find_user(id).await?),
        None => Ok(None),
    }
}

/// Binds `user` to the session, issuing a fresh session id.
pub async fn start(session: &Session, user: &User) -> Result<(), WebError> {
    session.cycle_id().await.map_err(session_err)?;
    session.insert(USER_KEY, user.id).await.map_err(session_err)
}

pub async fn end(session: &Session) -> Result<(), WebError> {
    session.flush().await.map_err(session_err)
}

/// The current user, if signed in.
pub struct Viewer(pub Option<User>);

impl Viewer {
    pub fn id(&self) -> Option<Id> {
        self.0.as_ref().map(|user| user.id)
    }

    pub fn nav(&self) -> Nav {
        Nav::for_user(self.0.as_ref())
    }
}

impl FromRequestParts<AppState> for Viewer {
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Viewer(session_user(parts, state).await?))
    }
}

/// A signed-in user. Anonymous requests are sent to the login page.
pub struct SignedIn(pub User);

impl SignedIn {
    pub fn role(&self) -> Role {
        resolve_role(self.0.clone())
    }

    pub fn nav(&self) -> Nav {
        Nav::for_user(Some(&self.0))
    }
}

impl FromRequestParts<AppState> for SignedIn {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match session_user(parts, state).await {
            Ok(Some(user)) => Ok(SignedIn(user)),
            Ok(None) => Err(login_redirect(parts).into_response()),
            Err(e) => Err(e.into_response()),
        }
    }
}

/// GET requests come back to the page they asked for after logging in.
fn login_redirect(parts: &Parts) -> Redirect {
    if parts.method == Method::GET {
        let next = parts.uri.path().replace('%', "%25").replace('&', "%26").replace('+', "%2B");
        Redirect::to(&format!("/accounts/login/?next={next}"))
    } else {
        Redirect::to("/accounts/login/")
    }
}

/// Reduces a URL to its path (and query) so redirects never leave the site.
pub fn local_path(url: &str) -> Option<String> {
    let path = match url.split_once("://") {
        Some((_, rest)) => &rest[rest.find('/')?..],
        None => url,
    };
    // Browsers drop tab and newline from Location, so "/\t/x" would become "//x".
    if path.chars().any(|c| c.is_ascii_control()) {
        return None;
    }
    let on_site = path.starts_with('/') && !path.starts_with("//") && !path.contains('\\');
    on_site.then(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::local_path;

    #[test]
    fn local_path_strips_origin() {
        assert_eq!(local_path("http://localhost:8000/topic/1/").as_deref(), Some("/topic/1/"));
        assert_eq!(local_path("/posts/3/").as_deref(), Some("/posts/3/"));
    }

    #[test]
    fn local_path_rejects_off_site_targets() {
        assert_eq!(local_path("//evil.example/"), None);
        assert_eq!(local_path("https://evil.example"), None);
        assert_eq!(local_path("/\\evil.example"), None);
        assert_eq!(local_path("javascript:alert(1)"), None);
        assert_eq!(local_path("/\t/evil.example"), None);
        assert_eq!(local_path("/\n"), None);
        assert_eq!(local_path("http://localhost/\r/evil.example"), None);
    }
}
