//! HTTP mapping for [`AppError`].

use askama::Template;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use rf_core::AppError;
use rf_ui::{ErrorTemplate, Nav};
use tracing::error;

/// Handler error: an [`AppError`] rendered as an HTML error page.
#[derive(Debug)]
pub struct WebError(pub AppError);

impl From<AppError> for WebError {
    fn from(err: AppError) -> Self {
        WebError(err)
    }
}

impl WebError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            AppError::NotFound(..) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::SEE_OTHER,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            AppError::Unauthorized(_) => return Redirect::to("/accounts/login/").into_response(),
            AppError::Internal(_) => {
                error!(error = %self.0, "request failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let page = ErrorTemplate {
            nav: Nav::anonymous(),
            page_title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            message: message.clone(),
        };
        match page.render() {
            Ok(html) => (status, Html(html)).into_response(),
            Err(e) => {
                error!(error = %e, "error page rendering failed");
                (status, message).into_response()
            }
        }
    }
}

/// Renders a template into an HTML response body.
pub(crate) fn render<T: Template>(template: T) -> Result<Html<String>, WebError> {
    template.render().map(Html).map_err(|e| {
        error!(error = %e, "template rendering failed");
        WebError(AppError::Internal(format!("template rendering failed: {e}")))
    })
}
