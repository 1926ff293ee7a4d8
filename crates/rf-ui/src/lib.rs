//! # rf-ui
//!
//! Askama templates and the flat view models they render. Handlers build a
//! view model from domain types; templates never touch `rf-core` directly.

use askama::Template;
use chrono::{DateTime, Utc};
use rf_core::models::{Id, PostSummary, Topic, User};
use rf_core::roles::UserProfile;

fn stamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Navigation bar state for the signed-in user, if any.
#[derive(Debug, Clone, Default)]
pub struct Nav {
    pub logged_in: bool,
    pub user_id: Id,
    pub username: String,
    pub is_admin: bool,
}

impl Nav {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user: Option<&User>) -> Self {
        match user {
            Some(user) => Self {
                logged_in: true,
                user_id: user.id,
                username: user.username.clone(),
                is_admin: user.is_staff,
            },
            None => Self::anonymous(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopicRow {
    pub id: Id,
    pub name: String,
}

impl From<&Topic> for TopicRow {
    fn from(topic: &Topic) -> Self {
        Self { id: topic.id, name: topic.name.clone() }
    }
}

/// One post as rendered in a listing or thread.
#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: Id,
    pub has_title: bool,
    pub title: String,
    pub author_id: Id,
    pub author: String,
    pub created: String,
    pub text: String,
    pub votes: i64,
    pub voted: bool,
    pub can_delete: bool,
}

impl PostRow {
    pub fn new(summary: &PostSummary, nav: &Nav) -> Self {
        let post = &summary.post;
        Self {
            id: post.id,
            has_title: post.title.is_some(),
            title: post.title.clone().unwrap_or_default(),
            author_id: post.author_id,
            author: post.author_name.clone(),
            created: stamp(&post.created_at),
            text: post.text.clone(),
            votes: summary.votes,
            voted: summary.voted,
            can_delete: nav.logged_in && (nav.is_admin || nav.user_id == post.author_id),
        }
    }
}

/// Link to a post on a profile page.
#[derive(Debug, Clone)]
pub struct PostLink {
    pub id: Id,
    pub label: String,
    pub created: String,
}

#[derive(Template)]
#[template(path = "topics.html")]
pub struct TopicsTemplate {
    pub nav: Nav,
    pub page_title: String,
    pub topics: Vec<TopicRow>,
}

#[derive(Template)]
#[template(path = "new_topic.html")]
pub struct NewTopicTemplate {
    pub nav: Nav,
    pub page_title: String,
    pub name: String,
    pub error: String,
    pub has_error: bool,
}

#[derive(Template)]
#[template(path = "topic.html")]
pub struct TopicTemplate {
    pub nav: Nav,
    pub page_title: String,
    pub topic: TopicRow,
    pub posts: Vec<PostRow>,
}

#[derive(Template)]
#[template(path = "new_thread.html")]
pub struct NewThreadTemplate {
    pub nav: Nav,
    pub page_title: String,
    pub topic: TopicRow,
}

/// Thread page. `thread` holds the root first, then its direct replies.
#[derive(Template)]
#[template(path = "post.html")]
pub struct PostTemplate {
    pub nav: Nav,
    pub page_title: String,
    pub topic: TopicRow,
    pub root_id: Id,
    pub thread: Vec<PostRow>,
}

impl PostTemplate {
    pub fn new(nav: Nav, topic: &Topic, root: &PostSummary, replies: &[PostSummary]) -> Self {
        let thread = std::iter::once(root)
            .chain(replies)
            .map(|summary| PostRow::new(summary, &nav))
            .collect();
        Self {
            page_title: root.post.title.clone().unwrap_or_default(),
            topic: topic.into(),
            root_id: root.post.id,
            thread,
            nav,
        }
    }
}

#[derive(Template)]
#[template(path = "user.html")]
pub struct UserTemplate {
    pub nav: Nav,
    pub page_title: String,
    pub user_id: Id,
    pub username: String,
    pub email: String,
    pub joined: String,
    pub last_login: String,
    pub is_admin: bool,
    pub page: String,
    pub has_page: bool,
    pub post_count: usize,
    pub posts: Vec<PostLink>,
}

impl UserTemplate {
    pub fn new(nav: Nav, profile: &UserProfile) -> Self {
        let user = profile.user();
        Self {
            nav,
            page_title: profile.display_name().to_string(),
            user_id: user.id,
            username: profile.display_name().to_string(),
            email: user.email.clone(),
            joined: stamp(&user.date_joined),
            last_login: user.last_login.as_ref().map(stamp).unwrap_or_else(|| "never".into()),
            is_admin: profile.role.is_admin(),
            page: profile.page.clone().unwrap_or_default(),
            has_page: profile.page.is_some(),
            post_count: profile.post_count(),
            posts: profile
                .posts
                .iter()
                .map(|post| PostLink {
                    id: post.id,
                    label: post.title.clone().unwrap_or_else(|| "Reply".into()),
                    created: stamp(&post.created_at),
                })
                .collect(),
        }
    }
}

#[derive(Template)]
#[template(path = "edit_user.html")]
pub struct EditUserTemplate {
    pub nav: Nav,
    pub page_title: String,
    pub page: String,
    pub is_admin: bool,
}

#[derive(Template)]
#[template(path = "signup.html")]
pub struct SignupTemplate {
    pub nav: Nav,
    pub page_title: String,
    pub username: String,
    pub email: String,
    pub error: String,
    pub has_error: bool,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub nav: Nav,
    pub page_title: String,
    pub username: String,
    pub next: String,
    pub error: String,
    pub has_error: bool,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub nav: Nav,
    pub page_title: String,
    pub status: u16,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::models::Post;

    fn summary(author_id: Id) -> PostSummary {
        PostSummary {
            post: Post {
                id: 4,
                author_id,
                author_name: "alice".into(),
                topic_id: Some(1),
                parent_id: None,
                title: Some("<b>Hi</b>".into()),
                text: "hello".into(),
                created_at: Utc::now(),
            },
            votes: 2,
            voted: true,
        }
    }

    #[test]
    fn delete_button_only_for_author_or_admin() {
        let mut nav = Nav { logged_in: true, user_id: 7, username: "bob".into(), is_admin: false };
        assert!(!PostRow::new(&summary(1), &nav).can_delete);
        assert!(PostRow::new(&summary(7), &nav).can_delete);
        nav.is_admin = true;
        assert!(PostRow::new(&summary(1), &nav).can_delete);
        assert!(!PostRow::new(&summary(1), &Nav::anonymous()).can_delete);
    }

    #[test]
    fn topic_page_escapes_titles() {
        let nav = Nav::anonymous();
        let html = TopicTemplate {
            posts: vec![PostRow::new(&summary(1), &nav)],
            nav,
            page_title: "General".into(),
            topic: TopicRow { id: 1, name: "General".into() },
        }
        .render()
        .unwrap();

        assert!(!html.contains("<b>Hi"));
        assert!(html.contains("&#60;b&#62;Hi&#60;/b&#62;"));
        assert!(html.contains("/posts/4/"));
        assert!(!html.contains("/vote/4/"));
    }
}
