//! Account pages: signup, login, logout, profiles and personal pages.

use crate::error::{render, WebError};
use crate::handlers::AppState;
use crate::session::{self, local_path, SignedIn, Viewer};
use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use rf_core::{AppError, Id};
use rf_ui::{EditUserTemplate, LoginTemplate, Nav, SignupTemplate, UserTemplate};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password1: String,
    #[serde(default)]
    pub password2: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageForm {
    #[serde(default)]
    pub page: String,
}

fn signup_page(nav: Nav, form: &SignupForm, error: Option<String>) -> SignupTemplate {
    SignupTemplate {
        nav,
        page_title: "Sign up".into(),
        username: form.username.clone(),
        email: form.email.clone(),
        has_error: error.is_some(),
        error: error.unwrap_or_default(),
    }
}

fn login_page(nav: Nav, username: &str, next: Option<String>, error: Option<String>) -> LoginTemplate {
    LoginTemplate {
        nav,
        page_title: "Log in".into(),
        username: username.to_string(),
        next: next.unwrap_or_default(),
        has_error: error.is_some(),
        error: error.unwrap_or_default(),
    }
}

pub async fn signup_form(viewer: Viewer) -> Result<impl IntoResponse, WebError> {
    let empty = SignupForm {
        username: String::new(),
        email: String::new(),
        password1: String::new(),
        password2: String::new(),
    };
    render(signup_page(viewer.nav(), &empty, None))
}

/// Creates a member account and logs it in.
pub async fn signup(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<SignupForm>,
) -> Result<Response, WebError> {
    let outcome = state
        .forum
        .signup(&form.username, &form.email, &form.password1, &form.password2)
        .await;

    let (status, error) = match outcome {
        Ok(user) => {
            session::start(&session, &user).await?;
            info!(user = user.id, "signed up");
            return Ok(Redirect::to("/topics/").into_response());
        }
        Err(AppError::ValidationError(msg)) => (StatusCode::BAD_REQUEST, msg),
        Err(AppError::Conflict(_)) => (
            StatusCode::CONFLICT,
            "a user with that username already exists".to_string(),
        ),
        Err(e) => return Err(e.into()),
    };
    let page = render(signup_page(Nav::anonymous(), &form, Some(error)))?;
    Ok((status, page).into_response())
}

pub async fn login_form(
    viewer: Viewer,
    Query(query): Query<LoginQuery>,
) -> Result<impl IntoResponse, WebError> {
    render(login_page(viewer.nav(), "", query.next, None))
}

pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Result<Response, WebError> {
    match state.forum.login(&form.username, &form.password).await {
        Ok(user) => {
            session::start(&session, &user).await?;
            info!(user = user.id, "logged in");
            let next = form
                .next
                .as_deref()
                .and_then(local_path)
                .unwrap_or_else(|| "/topics/".to_string());
            Ok(Redirect::to(&next).into_response())
        }
        Err(AppError::Unauthorized(msg)) => {
            let page = render(login_page(Nav::anonymous(), &form.username, form.next, Some(msg)))?;
            Ok((StatusCode::UNAUTHORIZED, page).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn logout(session: Session) -> Result<Redirect, WebError> {
    session::end(&session).await?;
    Ok(Redirect::to("/topics/"))
}

/// Public page of any user, rendered through role resolution.
pub async fn user_page(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, WebError> {
    let profile = state.forum.user_profile(id).await?;
    render(UserTemplate::new(viewer.nav(), &profile))
}

pub async fn edit_user_form(
    State(state): State<AppState>,
    user: SignedIn,
) -> Result<impl IntoResponse, WebError> {
    let role = user.role();
    let page = state.forum.personal_page(&role).await?;
    render(EditUserTemplate {
        nav: user.nav(),
        page_title: "Your page".into(),
        page: page.unwrap_or_default(),
        is_admin: role.is_admin(),
    })
}

pub async fn edit_user(
    State(state): State<AppState>,
    user: SignedIn,
    Form(form): Form<PageForm>,
) -> Result<Redirect, WebError> {
    state.forum.set_personal_page(&user.role(), &form.page).await?;
    Ok(Redirect::to(&format!("/user/{}/", user.0.id)))
}
