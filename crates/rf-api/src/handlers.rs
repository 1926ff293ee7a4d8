//! # rf-api Handlers
//!
//! This module coordinates the flow between HTTP requests and the forum service.

use crate::error::{render, WebError};
use crate::session::{local_path, SignedIn, Viewer};
use axum::extract::{Form, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use rf_core::{AppError, ForumService, Id, PostView};
use rf_ui::{NewThreadTemplate, NewTopicTemplate, PostRow, PostTemplate, TopicRow, TopicTemplate, TopicsTemplate};
use serde::Deserialize;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub forum: ForumService,
}

#[derive(Debug, Deserialize)]
pub struct TopicForm {
    #[serde(default)]
    pub name: String,
}

/// Thread or reply submission. `parent` wins when both targets are present.
#[derive(Debug, Deserialize)]
pub struct NewPostForm {
    pub topic: Option<String>,
    pub parent: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

fn parse_id(field: &str, raw: &str) -> Result<Id, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::ValidationError(format!("{field} must be a numeric id")))
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Lists every topic.
pub async fn topics_index(
    State(state): State<AppState>,
    viewer: Viewer,
) -> Result<impl IntoResponse, WebError> {
    let topics = state.forum.list_topics().await?;
    render(TopicsTemplate {
        nav: viewer.nav(),
        page_title: "Topics".into(),
        topics: topics.iter().map(TopicRow::from).collect(),
    })
}

pub async fn new_topic_form(user: SignedIn) -> Result<impl IntoResponse, WebError> {
    if !user.role().can_manage_topics() {
        return Err(AppError::Forbidden("only administrators may create topics".into()).into());
    }
    render(NewTopicTemplate {
        nav: user.nav(),
        page_title: "New topic".into(),
        name: String::new(),
        error: String::new(),
        has_error: false,
    })
}

/// Get-or-create, then show the topic.
pub async fn create_topic(
    State(state): State<AppState>,
    user: SignedIn,
    Form(form): Form<TopicForm>,
) -> Result<Response, WebError> {
    match state.forum.create_topic(&user.role(), &form.name).await {
        Ok(topic) => Ok(Redirect::to(&format!("/topic/{}/", topic.id)).into_response()),
        Err(AppError::ValidationError(error)) => {
            let page = render(NewTopicTemplate {
                nav: user.nav(),
                page_title: "New topic".into(),
                name: form.name,
                error,
                has_error: true,
            })?;
            Ok((StatusCode::BAD_REQUEST, page).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn rename_topic(
    State(state): State<AppState>,
    user: SignedIn,
    Path(id): Path<Id>,
    Form(form): Form<TopicForm>,
) -> Result<Redirect, WebError> {
    let topic = state.forum.rename_topic(&user.role(), id, &form.name).await?;
    Ok(Redirect::to(&format!("/topic/{}/", topic.id)))
}

/// Threads of one topic.
pub async fn topic_page(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, WebError> {
    let (topic, roots) = state.forum.topic_page(id, viewer.id()).await?;
    let nav = viewer.nav();
    render(TopicTemplate {
        page_title: topic.name.clone(),
        topic: TopicRow::from(&topic),
        posts: roots.iter().map(|summary| PostRow::new(summary, &nav)).collect(),
        nav,
    })
}

pub async fn new_thread_form(
    State(state): State<AppState>,
    user: SignedIn,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, WebError> {
    let topic = state.forum.get_topic(id).await?;
    render(NewThreadTemplate {
        nav: user.nav(),
        page_title: format!("New thread in {}", topic.name),
        topic: TopicRow::from(&topic),
    })
}

/// Roots render as a thread; replies bounce to their root, anchored.
pub async fn post_page(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Id>,
) -> Result<Response, WebError> {
    match state.forum.view_post(id, viewer.id()).await? {
        PostView::Redirect { root_id, anchor } => {
            Ok(Redirect::to(&format!("/posts/{root_id}/#post-{anchor}")).into_response())
        }
        PostView::Thread { topic, root, replies } => {
            Ok(render(PostTemplate::new(viewer.nav(), &topic, &root, &replies))?.into_response())
        }
    }
}

pub async fn create_post(
    State(state): State<AppState>,
    SignedIn(author): SignedIn,
    Form(form): Form<NewPostForm>,
) -> Result<Redirect, WebError> {
    let post = match (present(&form.parent), present(&form.topic)) {
        (Some(parent), _) => {
            let parent = parse_id("parent", parent)?;
            state.forum.create_reply(&author, parent, &form.text).await?
        }
        (None, Some(topic)) => {
            let topic = parse_id("topic", topic)?;
            state
                .forum
                .create_root_post(&author, topic, &form.title, &form.text)
                .await?
        }
        (None, None) => {
            return Err(AppError::ValidationError("either topic or parent is required".into()).into())
        }
    };
    Ok(Redirect::to(&format!("/posts/{}/", post.id)))
}

/// Deletes a post subtree and returns to where it hung.
pub async fn delete_post(
    State(state): State<AppState>,
    user: SignedIn,
    Path(id): Path<Id>,
) -> Result<Redirect, WebError> {
    let post = state.forum.delete_post(&user.role(), id).await?;
    let back = match (post.parent_id, post.topic_id) {
        (Some(parent), _) => format!("/posts/{parent}/"),
        (None, Some(topic)) => format!("/topic/{topic}/"),
        (None, None) => "/topics/".to_string(),
    };
    Ok(Redirect::to(&back))
}

/// Toggles the vote, then returns to the referring page.
pub async fn vote(
    State(state): State<AppState>,
    SignedIn(user): SignedIn,
    Path(id): Path<Id>,
    headers: HeaderMap,
) -> Result<Redirect, WebError> {
    state.forum.toggle_vote(&user, id).await?;
    let back = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .and_then(local_path)
        .unwrap_or_else(|| format!("/posts/{id}/"));
    Ok(Redirect::to(&back))
}

pub async fn not_found() -> WebError {
    WebError(AppError::NotFound("Page".into(), "requested path".into()))
}
