//! # Domain Models
//!
//! These structs represent the core entities of Rusty-Forum.
//! Rows are identified by store-assigned integer keys, which also appear in URLs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Primary key type shared by every entity.
pub type Id = i64;

/// A forum account. The password hash never leaves the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub email: String,
    /// Staff accounts resolve to [`crate::Role::Admin`]
    pub is_staff: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Input for account creation. `password_hash` is produced by an `AuthProvider`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_staff: bool,
}

/// A top-level category (e.g., "General").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: Id,
    pub name: String,
}

/// The fundamental unit of conversation.
///
/// A thread root has `topic_id` set and no parent; a reply has `parent_id` set
/// and no topic of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Id,
    pub author_id: Id,
    /// Denormalized from the users table on read
    pub author_name: String,
    pub topic_id: Option<Id>,
    pub parent_id: Option<Id>,
    pub title: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Where a new post attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostTarget {
    /// Start a thread in a topic
    Topic(Id),
    /// Reply to an existing post
    Parent(Id),
}

/// Validated input for post creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub author_id: Id,
    pub target: PostTarget,
    pub title: Option<String>,
    pub text: String,
}

/// One user's vote on one post. At most one per (user, post).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: Id,
    pub user_id: Id,
    pub post_id: Id,
    pub created_at: DateTime<Utc>,
}

/// Per-user key/value row. Unique per (user, key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMeta {
    pub id: Id,
    pub user_id: Id,
    pub key: String,
    pub value: String,
}

/// A post as listed on a page, with its voting state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSummary {
    pub post: Post,
    pub votes: i64,
    /// Whether the viewing user has a vote on this post
    pub voted: bool,
}

/// Result of viewing a post by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostView {
    /// The requested post is a root: render it with its direct replies.
    Thread {
        topic: Topic,
        root: PostSummary,
        replies: Vec<PostSummary>,
    },
    /// The requested post is a reply: show the root's page anchored at `anchor`.
    Redirect { root_id: Id, anchor: Id },
}
