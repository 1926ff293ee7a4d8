//! # ForumService
//!
//! Domain rules of the forum: thread nesting, vote toggling, topic management,
//! personal pages and accounts. Handlers only ever talk to this type; the
//! storage and hashing backends are injected as ports.

use crate::error::{AppError, Result};
use crate::models::{Id, NewPost, NewUser, Post, PostSummary, PostTarget, PostView, Topic, User, Vote};
use crate::roles::{resolve_role, Role, UserProfile, ADMIN_PAGE, PAGE_KEY};
use crate::traits::{AuthProvider, ForumRepo, UserRepo};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const MAX_TOPIC_NAME: usize = 128;
pub const MAX_TITLE: usize = 256;
pub const MAX_USERNAME: usize = 150;
pub const MAX_EMAIL: usize = 254;

#[derive(Clone)]
pub struct ForumService {
    posts: Arc<dyn ForumRepo>,
    users: Arc<dyn UserRepo>,
    auth: Arc<dyn AuthProvider>,
}

/// Trims `value` and rejects it when empty or longer than `max` characters.
fn required(field: &str, value: &str, max: usize) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::ValidationError(format!("{field} is required")));
    }
    if value.chars().count() > max {
        return Err(AppError::ValidationError(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value.to_string())
}

/// Rejects a blank post body; the body is stored exactly as written.
fn body(text: &str) -> Result<String> {
    if text.trim().is_empty() {
        return Err(AppError::ValidationError("text is required".into()));
    }
    Ok(text.to_string())
}

impl ForumService {
    pub fn new(
        posts: Arc<dyn ForumRepo>,
        users: Arc<dyn UserRepo>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self { posts, users, auth }
    }

    // ── Topics ──────────────────────────────────────────────────────────────

    pub async fn list_topics(&self) -> Result<Vec<Topic>> {
        self.posts.list_topics().await
    }

    pub async fn get_topic(&self, id: Id) -> Result<Topic> {
        self.posts
            .get_topic(id)
            .await?
            .ok_or_else(|| AppError::not_found("Topic", id))
    }

    /// Get-or-create by name. Repeated calls return the same topic.
    #[instrument(skip(self, actor), fields(actor = actor.user().id))]
    pub async fn create_topic(&self, actor: &Role, name: &str) -> Result<Topic> {
        if !actor.can_manage_topics() {
            return Err(AppError::Forbidden("only administrators may create topics".into()));
        }
        let name = required("name", name, MAX_TOPIC_NAME)?;
        let topic = self.posts.get_or_create_topic(&name).await?;
        info!(topic = topic.id, "topic ready");
        Ok(topic)
    }

    #[instrument(skip(self, actor), fields(actor = actor.user().id))]
    pub async fn rename_topic(&self, actor: &Role, id: Id, name: &str) -> Result<Topic> {
        if !actor.can_manage_topics() {
            return Err(AppError::Forbidden("only administrators may rename topics".into()));
        }
        let name = required("name", name, MAX_TOPIC_NAME)?;
        self.get_topic(id).await?;
        self.posts.rename_topic(id, &name).await
    }

    // ── Threads ─────────────────────────────────────────────────────────────

    /// Root posts of a topic in creation order.
    pub async fn list_roots(&self, topic_id: Id) -> Result<Vec<Post>> {
        self.get_topic(topic_id).await?;
        self.posts.list_roots(topic_id).await
    }

    /// Topic page: the topic and its threads with vote state for `viewer`.
    pub async fn topic_page(
        &self,
        topic_id: Id,
        viewer: Option<Id>,
    ) -> Result<(Topic, Vec<PostSummary>)> {
        let topic = self.get_topic(topic_id).await?;
        let roots = self.posts.list_roots(topic_id).await?;
        let summaries = self.summarize_all(roots, viewer).await?;
        Ok((topic, summaries))
    }

    /// Direct replies of a post in creation order.
    pub async fn list_replies(&self, post_id: Id) -> Result<Vec<Post>> {
        self.get_post(post_id).await?;
        self.posts.list_replies(post_id).await
    }

    pub async fn get_post(&self, id: Id) -> Result<Post> {
        self.posts
            .get_post(id)
            .await?
            .ok_or_else(|| AppError::not_found("Post", id))
    }

    /// Follows parent links up to the thread root.
    pub async fn root_of(&self, post: Post) -> Result<Post> {
        let mut current = post;
        while let Some(parent_id) = current.parent_id {
            current = self.get_post(parent_id).await?;
        }
        Ok(current)
    }

    /// Topic of a post, inherited from its root for replies.
    pub async fn topic_of(&self, post: Post) -> Result<Topic> {
        let root = self.root_of(post).await?;
        let topic_id = root
            .topic_id
            .ok_or_else(|| AppError::Internal(format!("root post {} has no topic", root.id)))?;
        self.get_topic(topic_id).await
    }

    /// Roots render as a thread page; replies resolve to their root's page.
    #[instrument(skip(self))]
    pub async fn view_post(&self, id: Id, viewer: Option<Id>) -> Result<PostView> {
        let post = self.get_post(id).await?;
        if !post.is_root() {
            let root = self.root_of(post).await?;
            debug!(root = root.id, "reply resolved to thread root");
            return Ok(PostView::Redirect { root_id: root.id, anchor: id });
        }

        let topic = self.topic_of(post.clone()).await?;
        let replies = self.posts.list_replies(post.id).await?;
        let root = self.summarize(post, viewer).await?;
        let replies = self.summarize_all(replies, viewer).await?;
        Ok(PostView::Thread { topic, root, replies })
    }

    async fn summarize(&self, post: Post, viewer: Option<Id>) -> Result<PostSummary> {
        let votes = self.posts.count_votes(post.id).await?;
        let voted = match viewer {
            Some(user_id) => self.posts.find_vote(user_id, post.id).await?.is_some(),
            None => false,
        };
        Ok(PostSummary { post, votes, voted })
    }

    async fn summarize_all(&self, posts: Vec<Post>, viewer: Option<Id>) -> Result<Vec<PostSummary>> {
        let mut out = Vec::with_capacity(posts.len());
        for post in posts {
            out.push(self.summarize(post, viewer).await?);
        }
        Ok(out)
    }

    // ── Posting ─────────────────────────────────────────────────────────────

    #[instrument(skip(self, author, text), fields(author = author.id))]
    pub async fn create_root_post(
        &self,
        author: &User,
        topic_id: Id,
        title: &str,
        text: &str,
    ) -> Result<Post> {
        let title = required("title", title, MAX_TITLE)?;
        let text = body(text)?;
        self.get_topic(topic_id).await?;

        let post = self
            .posts
            .insert_post(NewPost {
                author_id: author.id,
                target: PostTarget::Topic(topic_id),
                title: Some(title),
                text,
            })
            .await?;
        info!(post = post.id, "thread created");
        Ok(post)
    }

    #[instrument(skip(self, author, text), fields(author = author.id))]
    pub async fn create_reply(&self, author: &User, parent_id: Id, text: &str) -> Result<Post> {
        let text = body(text)?;
        self.get_post(parent_id).await?;

        let post = self
            .posts
            .insert_post(NewPost {
                author_id: author.id,
                target: PostTarget::Parent(parent_id),
                title: None,
                text,
            })
            .await?;
        info!(post = post.id, "reply created");
        Ok(post)
    }

    /// Removes a post with its whole reply subtree. Returns the removed post.
    #[instrument(skip(self, actor), fields(actor = actor.user().id))]
    pub async fn delete_post(&self, actor: &Role, id: Id) -> Result<Post> {
        let post = self.get_post(id).await?;
        if !actor.can_delete(&post) {
            return Err(AppError::Forbidden("only the author or an administrator may delete a post".into()));
        }
        let removed = self.posts.delete_post_tree(id).await?;
        info!(removed, "post tree deleted");
        Ok(post)
    }

    // ── Votes ───────────────────────────────────────────────────────────────

    /// Flips the (user, post) vote. Returns the vote when it now exists.
    ///
    /// The store's unique (user, post) constraint decides races: a conflicting
    /// insert means another request already voted, and that vote is returned.
    #[instrument(skip(self, user), fields(user = user.id))]
    pub async fn toggle_vote(&self, user: &User, post_id: Id) -> Result<Option<Vote>> {
        self.get_post(post_id).await?;

        if let Some(vote) = self.posts.find_vote(user.id, post_id).await? {
            if !self.posts.delete_vote(vote.id).await? {
                debug!(vote = vote.id, "vote already removed concurrently");
            }
            return Ok(None);
        }

        match self.posts.insert_vote(user.id, post_id).await {
            Ok(vote) => Ok(Some(vote)),
            Err(AppError::Conflict(_)) => {
                warn!("concurrent vote insert, keeping existing vote");
                self.posts.find_vote(user.id, post_id).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn vote_count(&self, post_id: Id) -> Result<i64> {
        self.posts.count_votes(post_id).await
    }

    // ── Users ───────────────────────────────────────────────────────────────

    pub async fn find_user(&self, id: Id) -> Result<Option<User>> {
        self.users.get_user(id).await
    }

    pub async fn get_user(&self, id: Id) -> Result<User> {
        self.find_user(id)
            .await?
            .ok_or_else(|| AppError::not_found("User", id))
    }

    /// Public page of any user.
    pub async fn user_profile(&self, id: Id) -> Result<UserProfile> {
        let role = resolve_role(self.get_user(id).await?);
        let posts = self.posts.list_posts_by_author(id).await?;
        let page = self.personal_page(&role).await?;
        Ok(UserProfile { role, posts, page })
    }

    pub async fn personal_page(&self, role: &Role) -> Result<Option<String>> {
        match role {
            Role::Admin(_) => Ok(Some(ADMIN_PAGE.to_string())),
            Role::Member(user) => Ok(self
                .users
                .get_meta(user.id, PAGE_KEY)
                .await?
                .map(|meta| meta.value)),
        }
    }

    /// Stores a member's page. Admin pages are fixed, so writes are dropped.
    #[instrument(skip(self, role, text), fields(user = role.user().id))]
    pub async fn set_personal_page(&self, role: &Role, text: &str) -> Result<()> {
        match role {
            Role::Admin(_) => {
                debug!("ignoring personal page write for administrator");
                Ok(())
            }
            Role::Member(user) => {
                self.users.set_meta(user.id, PAGE_KEY, text).await?;
                Ok(())
            }
        }
    }

    // ── Accounts ────────────────────────────────────────────────────────────

    /// Registers a member account.
    pub async fn signup(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirm: &str,
    ) -> Result<User> {
        if password != confirm {
            return Err(AppError::ValidationError("the two password fields didn't match".into()));
        }
        self.register(username, email, password, false).await
    }

    /// Registers an administrator account.
    pub async fn create_staff(&self, username: &str, email: &str, password: &str) -> Result<User> {
        self.register(username, email, password, true).await
    }

    #[instrument(skip(self, email, password))]
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        is_staff: bool,
    ) -> Result<User> {
        let username = required("username", username, MAX_USERNAME)?;
        let email = email.trim();
        if email.chars().count() > MAX_EMAIL || (!email.is_empty() && !email.contains('@')) {
            return Err(AppError::ValidationError("enter a valid email address".into()));
        }
        if password.is_empty() {
            return Err(AppError::ValidationError("password is required".into()));
        }

        let password_hash = self.auth.hash_password(password)?;
        let user = self
            .users
            .create_user(NewUser {
                username,
                email: email.to_string(),
                password_hash,
                is_staff,
            })
            .await?;
        info!(user = user.id, is_staff, "account created");
        Ok(user)
    }

    /// Checks credentials and records the login time.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<User> {
        let rejected = || AppError::Unauthorized("invalid username or password".into());

        let (mut user, hash) = self
            .users
            .find_credentials(username.trim())
            .await?
            .ok_or_else(rejected)?;
        if !self.auth.verify_password(password, &hash) {
            warn!(user = user.id, "password mismatch");
            return Err(rejected());
        }

        self.users.touch_last_login(user.id).await?;
        user.last_login = Some(Utc::now());
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserMeta;
    use crate::traits::{MockAuthProvider, MockForumRepo, MockUserRepo};
    use mockall::predicate::eq;

    fn user(id: Id, is_staff: bool) -> User {
        User {
            id,
            username: format!("user{id}"),
            email: format!("user{id}@example.com"),
            is_staff,
            date_joined: Utc::now(),
            last_login: None,
        }
    }

    fn post(id: Id, topic_id: Option<Id>, parent_id: Option<Id>) -> Post {
        Post {
            id,
            author_id: 1,
            author_name: "user1".into(),
            topic_id,
            parent_id,
            title: topic_id.map(|_| "Hi".to_string()),
            text: "hello".into(),
            created_at: Utc::now(),
        }
    }

    fn vote(id: Id, user_id: Id, post_id: Id) -> Vote {
        Vote { id, user_id, post_id, created_at: Utc::now() }
    }

    fn service(posts: MockForumRepo, users: MockUserRepo, auth: MockAuthProvider) -> ForumService {
        ForumService::new(Arc::new(posts), Arc::new(users), Arc::new(auth))
    }

    fn with_posts(posts: MockForumRepo) -> ForumService {
        service(posts, MockUserRepo::new(), MockAuthProvider::new())
    }

    #[tokio::test]
    async fn toggle_vote_creates_missing_vote() {
        let mut posts = MockForumRepo::new();
        posts.expect_get_post().returning(|id| Ok(Some(post(id, Some(1), None))));
        posts.expect_find_vote().with(eq(7), eq(5)).times(1).returning(|_, _| Ok(None));
        posts
            .expect_insert_vote()
            .with(eq(7), eq(5))
            .times(1)
            .returning(|u, p| Ok(vote(1, u, p)));

        let result = with_posts(posts).toggle_vote(&user(7, false), 5).await.unwrap();
        assert_eq!(result.map(|v| v.post_id), Some(5));
    }

    #[tokio::test]
    async fn toggle_vote_removes_existing_vote() {
        let mut posts = MockForumRepo::new();
        posts.expect_get_post().returning(|id| Ok(Some(post(id, Some(1), None))));
        posts.expect_find_vote().returning(|u, p| Ok(Some(vote(3, u, p))));
        posts.expect_delete_vote().with(eq(3)).times(1).returning(|_| Ok(true));
        posts.expect_insert_vote().never();

        let result = with_posts(posts).toggle_vote(&user(7, false), 5).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn toggle_vote_lost_race_keeps_existing_vote() {
        let mut posts = MockForumRepo::new();
        let mut lookups = 0;
        posts.expect_get_post().returning(|id| Ok(Some(post(id, Some(1), None))));
        posts.expect_find_vote().times(2).returning(move |u, p| {
            lookups += 1;
            Ok((lookups > 1).then(|| vote(9, u, p)))
        });
        posts
            .expect_insert_vote()
            .returning(|_, _| Err(AppError::Conflict("votes.user_id, votes.post_id".into())));

        let result = with_posts(posts).toggle_vote(&user(7, false), 5).await.unwrap();
        assert_eq!(result.map(|v| v.id), Some(9));
    }

    #[tokio::test]
    async fn toggle_vote_on_missing_post_is_not_found() {
        let mut posts = MockForumRepo::new();
        posts.expect_get_post().returning(|_| Ok(None));
        posts.expect_find_vote().never();

        let err = with_posts(posts).toggle_vote(&user(7, false), 5).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(..)));
    }

    #[tokio::test]
    async fn member_cannot_create_topic() {
        let mut posts = MockForumRepo::new();
        posts.expect_get_or_create_topic().never();

        let member = resolve_role(user(2, false));
        let err = with_posts(posts).create_topic(&member, "General").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn member_cannot_rename_topic() {
        let mut posts = MockForumRepo::new();
        posts.expect_get_topic().never();
        posts.expect_rename_topic().never();

        let member = resolve_role(user(2, false));
        let err = with_posts(posts).rename_topic(&member, 1, "Mine").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn rename_onto_taken_name_is_a_conflict() {
        let mut posts = MockForumRepo::new();
        posts
            .expect_get_topic()
            .returning(|id| Ok(Some(Topic { id, name: "General".into() })));
        posts
            .expect_rename_topic()
            .withf(|id, name| *id == 1 && name == "Random")
            .times(1)
            .returning(|_, name| Err(AppError::Conflict(format!("topic {name} exists"))));

        let admin = resolve_role(user(1, true));
        let err = with_posts(posts).rename_topic(&admin, 1, " Random ").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn admin_creates_trimmed_topic() {
        let mut posts = MockForumRepo::new();
        posts
            .expect_get_or_create_topic()
            .withf(|name| name == "General")
            .times(1)
            .returning(|name| Ok(Topic { id: 1, name: name.to_string() }));

        let admin = resolve_role(user(1, true));
        let topic = with_posts(posts).create_topic(&admin, "  General ").await.unwrap();
        assert_eq!(topic.name, "General");
    }

    #[tokio::test]
    async fn root_post_requires_title() {
        let mut posts = MockForumRepo::new();
        posts.expect_insert_post().never();

        let err = with_posts(posts)
            .create_root_post(&user(1, false), 1, "   ", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn reply_has_no_topic_or_title() {
        let mut posts = MockForumRepo::new();
        posts.expect_get_post().returning(|id| Ok(Some(post(id, Some(1), None))));
        posts
            .expect_insert_post()
            .withf(|new| new.target == PostTarget::Parent(4) && new.title.is_none())
            .times(1)
            .returning(|new| {
                let mut reply = post(8, None, Some(4));
                reply.text = new.text;
                Ok(reply)
            });

        let reply = with_posts(posts).create_reply(&user(1, false), 4, "me too").await.unwrap();
        assert_eq!(reply.parent_id, Some(4));
        assert_eq!(reply.text, "me too");
    }

    #[tokio::test]
    async fn post_body_keeps_its_indentation() {
        let mut posts = MockForumRepo::new();
        posts.expect_get_post().returning(|id| Ok(Some(post(id, Some(1), None))));
        posts
            .expect_insert_post()
            .withf(|new| new.text == "    fn main() {}\n")
            .times(1)
            .returning(|new| {
                let mut reply = post(8, None, Some(4));
                reply.text = new.text;
                Ok(reply)
            });

        let service = with_posts(posts);
        let reply = service.create_reply(&user(1, false), 4, "    fn main() {}\n").await.unwrap();
        assert_eq!(reply.text, "    fn main() {}\n");

        let err = service.create_reply(&user(1, false), 4, " \n\t ").await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn nested_reply_redirects_to_root() {
        let mut posts = MockForumRepo::new();
        posts.expect_get_post().returning(|id| {
            Ok(Some(match id {
                1 => post(1, Some(1), None),
                2 => post(2, None, Some(1)),
                _ => post(id, None, Some(2)),
            }))
        });

        let view = with_posts(posts).view_post(3, None).await.unwrap();
        assert_eq!(view, PostView::Redirect { root_id: 1, anchor: 3 });
    }

    #[tokio::test]
    async fn admin_page_is_fixed_and_ignores_writes() {
        let mut users = MockUserRepo::new();
        users.expect_set_meta().never();
        users.expect_get_meta().never();
        let forum = service(MockForumRepo::new(), users, MockAuthProvider::new());

        let admin = resolve_role(user(1, true));
        forum.set_personal_page(&admin, "hacked").await.unwrap();
        assert_eq!(forum.personal_page(&admin).await.unwrap().as_deref(), Some(ADMIN_PAGE));
    }

    #[tokio::test]
    async fn member_page_reads_meta_row() {
        let mut users = MockUserRepo::new();
        users
            .expect_get_meta()
            .withf(|user_id, key| *user_id == 2 && key == PAGE_KEY)
            .returning(|user_id, key| {
                Ok(Some(UserMeta { id: 1, user_id, key: key.to_string(), value: "hello world".into() }))
            });
        let forum = service(MockForumRepo::new(), users, MockAuthProvider::new());

        let member = resolve_role(user(2, false));
        assert_eq!(forum.personal_page(&member).await.unwrap().as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn signup_rejects_mismatched_passwords() {
        let mut auth = MockAuthProvider::new();
        auth.expect_hash_password().never();
        let forum = service(MockForumRepo::new(), MockUserRepo::new(), auth);

        let err = forum.signup("alice", "", "one", "two").await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let mut users = MockUserRepo::new();
        users
            .expect_find_credentials()
            .returning(|_| Ok(Some((user(2, false), "$argon2id$stored".into()))));
        users.expect_touch_last_login().never();
        let mut auth = MockAuthProvider::new();
        auth.expect_verify_password().returning(|_, _| false);
        let forum = service(MockForumRepo::new(), users, auth);

        let err = forum.login("user2", "wrong").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
