//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use crate::error::Result;
use crate::models::{Id, NewPost, NewUser, Post, Topic, User, UserMeta, Vote};
use async_trait::async_trait;

/// Data persistence contract for topics, posts, and votes.
///
/// Uniqueness invariants (topic name, one vote per user and post) live in the
/// store. Implementations report a violated constraint as `AppError::Conflict`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForumRepo: Send + Sync {
    // Topic Operations
    async fn list_topics(&self) -> Result<Vec<Topic>>;
    async fn get_topic(&self, id: Id) -> Result<Option<Topic>>;
    /// Returns the topic with `name`, inserting it first if absent.
    async fn get_or_create_topic(&self, name: &str) -> Result<Topic>;
    async fn rename_topic(&self, id: Id, name: &str) -> Result<Topic>;

    // Post Operations
    async fn get_post(&self, id: Id) -> Result<Option<Post>>;
    async fn insert_post(&self, post: NewPost) -> Result<Post>;
    /// Root posts of a topic, oldest first.
    async fn list_roots(&self, topic_id: Id) -> Result<Vec<Post>>;
    /// Direct replies of a post, oldest first.
    async fn list_replies(&self, parent_id: Id) -> Result<Vec<Post>>;
    async fn list_posts_by_author(&self, author_id: Id) -> Result<Vec<Post>>;
    /// Deletes the post, every transitive reply, and their votes.
    /// Returns the number of posts removed.
    async fn delete_post_tree(&self, id: Id) -> Result<u64>;

    // Vote Operations
    async fn find_vote(&self, user_id: Id, post_id: Id) -> Result<Option<Vote>>;
    async fn insert_vote(&self, user_id: Id, post_id: Id) -> Result<Vote>;
    /// Returns false if the vote was already gone.
    async fn delete_vote(&self, id: Id) -> Result<bool>;
    async fn count_votes(&self, post_id: Id) -> Result<i64>;
}

/// Account and per-user metadata persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn get_user(&self, id: Id) -> Result<Option<User>>;
    async fn create_user(&self, user: NewUser) -> Result<User>;
    /// Looks up a user together with their stored password hash.
    async fn find_credentials(&self, username: &str) -> Result<Option<(User, String)>>;
    async fn touch_last_login(&self, id: Id) -> Result<()>;

    async fn get_meta(&self, user_id: Id, key: &str) -> Result<Option<UserMeta>>;
    /// Inserts or overwrites the (user, key) row.
    async fn set_meta(&self, user_id: Id, key: &str, value: &str) -> Result<UserMeta>;
}

/// Password hashing contract.
#[cfg_attr(test, mockall::automock)]
pub trait AuthProvider: Send + Sync {
    /// Produces a self-describing hash (PHC string) for storage.
    fn hash_password(&self, password: &str) -> Result<String>;

    /// Verifies a password against a stored hash. Malformed hashes never verify.
    fn verify_password(&self, password: &str, hash: &str) -> bool;
}
