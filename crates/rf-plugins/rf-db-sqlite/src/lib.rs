//! # rf-db-sqlite Implementation
//!
//! This module implements the data mapping between the SQLite relational model
//! and the `rf-core` domain models.
//!
//! Uniqueness rules (topic names, one vote per user and post, one meta row per
//! user and key) are table constraints, so concurrent requests and multiple
//! server processes agree without any in-process locking.

use async_trait::async_trait;
use chrono::Utc;
use rf_core::error::{AppError, Result};
use rf_core::models::{Id, NewPost, NewUser, Post, PostTarget, Topic, User, UserMeta, Vote};
use rf_core::traits::{ForumRepo, UserRepo};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

pub struct SqliteForumRepo {
    pool: SqlitePool,
}

const POST_SELECT: &str = "SELECT p.id, p.author_id, u.username AS author_name, p.topic_id, \
     p.parent_id, p.title, p.text, p.created_at \
     FROM posts p JOIN users u ON u.id = p.author_id";

const USER_COLUMNS: &str = "id, username, email, is_staff, date_joined, last_login";

/// All ids in the subtree rooted at the bound post id, the root included.
const SUBTREE: &str = "WITH RECURSIVE subtree(id) AS ( \
     SELECT id FROM posts WHERE id = ? \
     UNION ALL \
     SELECT p.id FROM posts p JOIN subtree s ON p.parent_id = s.id)";

/// Unique violations surface as `Conflict`; everything else is internal.
fn db_err(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(db.message().to_string())
        }
        _ => {
            error!(error = %e, "sqlite query failed");
            AppError::Internal(e.to_string())
        }
    }
}

fn post_from_row(row: &SqliteRow) -> sqlx::Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        author_id: row.try_get("author_id")?,
        author_name: row.try_get("author_name")?,
        topic_id: row.try_get("topic_id")?,
        parent_id: row.try_get("parent_id")?,
        title: row.try_get("title")?,
        text: row.try_get("text")?,
        created_at: row.try_get("created_at")?,
    })
}

fn user_from_row(row: &SqliteRow) -> sqlx::Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        is_staff: row.try_get("is_staff")?,
        date_joined: row.try_get("date_joined")?,
        last_login: row.try_get("last_login")?,
    })
}

fn topic_from_row(row: &SqliteRow) -> sqlx::Result<Topic> {
    Ok(Topic {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
    })
}

fn vote_from_row(row: &SqliteRow) -> sqlx::Result<Vote> {
    Ok(Vote {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        post_id: row.try_get("post_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn meta_from_row(row: &SqliteRow) -> sqlx::Result<UserMeta> {
    Ok(UserMeta {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        key: row.try_get("key")?,
        value: row.try_get("value")?,
    })
}

fn collect<T>(rows: Vec<SqliteRow>, map: fn(&SqliteRow) -> sqlx::Result<T>) -> Result<Vec<T>> {
    rows.iter().map(map).collect::<sqlx::Result<_>>().map_err(db_err)
}

impl SqliteForumRepo {
    /// Opens (creating if missing) the database at `url` and applies migrations.
    ///
    /// An in-memory database lives only as long as its connection, so
    /// `sqlite::memory:` URLs get a single connection that is never recycled.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        };
        let pool = pool_options.connect_with(options).await.map_err(db_err)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::Internal(format!("migration failed: {e}")))?;
        info!(in_memory, "sqlite store ready");

        Ok(Self { pool })
    }
}

#[async_trait]
impl ForumRepo for SqliteForumRepo {
    async fn list_topics(&self) -> Result<Vec<Topic>> {
        let rows = sqlx::query("SELECT id, name FROM topics ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        collect(rows, topic_from_row)
    }

    async fn get_topic(&self, id: Id) -> Result<Option<Topic>> {
        sqlx::query("SELECT id, name FROM topics WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|row| topic_from_row(&row))
            .transpose()
            .map_err(db_err)
    }

    /// The unique index on `name` makes the insert a no-op for a known name,
    /// even when two requests race on the same name.
    async fn get_or_create_topic(&self, name: &str) -> Result<Topic> {
        sqlx::query("INSERT INTO topics (name) VALUES (?) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        let row = sqlx::query("SELECT id, name FROM topics WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        topic_from_row(&row).map_err(db_err)
    }

    async fn rename_topic(&self, id: Id, name: &str) -> Result<Topic> {
        let row = sqlx::query("UPDATE topics SET name = ? WHERE id = ? RETURNING id, name")
            .bind(name)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| AppError::not_found("Topic", id))?;
        topic_from_row(&row).map_err(db_err)
    }

    async fn get_post(&self, id: Id) -> Result<Option<Post>> {
        sqlx::query(&format!("{POST_SELECT} WHERE p.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|row| post_from_row(&row))
            .transpose()
            .map_err(db_err)
    }

    async fn insert_post(&self, post: NewPost) -> Result<Post> {
        let (topic_id, parent_id) = match post.target {
            PostTarget::Topic(topic_id) => (Some(topic_id), None),
            PostTarget::Parent(parent_id) => (None, Some(parent_id)),
        };

        let id: Id = sqlx::query_scalar(
            "INSERT INTO posts (author_id, topic_id, parent_id, title, text, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(post.author_id)
        .bind(topic_id)
        .bind(parent_id)
        .bind(post.title)
        .bind(post.text)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        self.get_post(id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("post {id} vanished after insert")))
    }

    async fn list_roots(&self, topic_id: Id) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "{POST_SELECT} WHERE p.topic_id = ? AND p.parent_id IS NULL ORDER BY p.id"
        ))
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        collect(rows, post_from_row)
    }

    async fn list_replies(&self, parent_id: Id) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!("{POST_SELECT} WHERE p.parent_id = ? ORDER BY p.id"))
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        collect(rows, post_from_row)
    }

    async fn list_posts_by_author(&self, author_id: Id) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!("{POST_SELECT} WHERE p.author_id = ? ORDER BY p.id"))
            .bind(author_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        collect(rows, post_from_row)
    }

    /// Explicit cascade: votes on the subtree go first, then the posts.
    ///
    /// # Developer Note
    /// Both deletes run in one transaction so a crash never leaves votes
    /// pointing at half of a deleted thread. The posts are removed by a single
    /// statement, which keeps the self-referencing foreign key satisfied.
    async fn delete_post_tree(&self, id: Id) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(&format!(
            "{SUBTREE} DELETE FROM votes WHERE post_id IN (SELECT id FROM subtree)"
        ))
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let removed = sqlx::query(&format!(
            "{SUBTREE} DELETE FROM posts WHERE id IN (SELECT id FROM subtree)"
        ))
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }

    async fn find_vote(&self, user_id: Id, post_id: Id) -> Result<Option<Vote>> {
        sqlx::query(
            "SELECT id, user_id, post_id, created_at FROM votes WHERE user_id = ? AND post_id = ?",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(|row| vote_from_row(&row))
        .transpose()
        .map_err(db_err)
    }

    async fn insert_vote(&self, user_id: Id, post_id: Id) -> Result<Vote> {
        let row = sqlx::query(
            "INSERT INTO votes (user_id, post_id, created_at) VALUES (?, ?, ?) \
             RETURNING id, user_id, post_id, created_at",
        )
        .bind(user_id)
        .bind(post_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        vote_from_row(&row).map_err(db_err)
    }

    async fn delete_vote(&self, id: Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM votes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_votes(&self, post_id: Id) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE post_id = ?")
            .bind(post_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }
}

#[async_trait]
impl UserRepo for SqliteForumRepo {
    async fn get_user(&self, id: Id) -> Result<Option<User>> {
        sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|row| user_from_row(&row))
            .transpose()
            .map_err(db_err)
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (username, email, password_hash, is_staff, date_joined) \
             VALUES (?, ?, ?, ?, ?) RETURNING {USER_COLUMNS}"
        ))
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.is_staff)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        user_from_row(&row).map_err(db_err)
    }

    async fn find_credentials(&self, username: &str) -> Result<Option<(User, String)>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS}, password_hash FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => {
                let user = user_from_row(&row).map_err(db_err)?;
                let hash: String = row.try_get("password_hash").map_err(db_err)?;
                Ok(Some((user, hash)))
            }
            None => Ok(None),
        }
    }

    async fn touch_last_login(&self, id: Id) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_meta(&self, user_id: Id, key: &str) -> Result<Option<UserMeta>> {
        sqlx::query("SELECT id, user_id, key, value FROM user_meta WHERE user_id = ? AND key = ?")
            .bind(user_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|row| meta_from_row(&row))
            .transpose()
            .map_err(db_err)
    }

    async fn set_meta(&self, user_id: Id, key: &str, value: &str) -> Result<UserMeta> {
        let row = sqlx::query(
            "INSERT INTO user_meta (user_id, key, value) VALUES (?, ?, ?) \
             ON CONFLICT (user_id, key) DO UPDATE SET value = excluded.value \
             RETURNING id, user_id, key, value",
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        meta_from_row(&row).map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn repo() -> SqliteForumRepo {
        SqliteForumRepo::new("sqlite::memory:", 1).await.unwrap()
    }

    async fn member(repo: &SqliteForumRepo, username: &str) -> User {
        repo.create_user(NewUser {
            username: username.into(),
            email: format!("{username}@example.com"),
            password_hash: "hash".into(),
            is_staff: false,
        })
        .await
        .unwrap()
    }

    async fn root(repo: &SqliteForumRepo, author: &User, topic: &Topic, title: &str) -> Post {
        repo.insert_post(NewPost {
            author_id: author.id,
            target: PostTarget::Topic(topic.id),
            title: Some(title.into()),
            text: "body".into(),
        })
        .await
        .unwrap()
    }

    async fn reply(repo: &SqliteForumRepo, author: &User, parent: &Post) -> Post {
        repo.insert_post(NewPost {
            author_id: author.id,
            target: PostTarget::Parent(parent.id),
            title: None,
            text: "reply".into(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn topic_get_or_create_is_idempotent() {
        let repo = repo().await;
        let first = repo.get_or_create_topic("General").await.unwrap();
        let second = repo.get_or_create_topic("General").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(repo.list_topics().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn topics_list_in_creation_order() {
        let repo = repo().await;
        repo.get_or_create_topic("Zebras").await.unwrap();
        repo.get_or_create_topic("Aardvarks").await.unwrap();

        let names: Vec<_> = repo.list_topics().await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["Zebras", "Aardvarks"]);
    }

    #[tokio::test]
    async fn rename_onto_existing_name_conflicts() {
        let repo = repo().await;
        repo.get_or_create_topic("General").await.unwrap();
        let other = repo.get_or_create_topic("Other").await.unwrap();

        let err = repo.rename_topic(other.id, "General").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(matches!(
            repo.rename_topic(999, "Nope").await.unwrap_err(),
            AppError::NotFound(..)
        ));
    }

    #[tokio::test]
    async fn roots_and_replies_are_listed_separately() {
        let repo = repo().await;
        let alice = member(&repo, "alice").await;
        let topic = repo.get_or_create_topic("General").await.unwrap();

        let hi = root(&repo, &alice, &topic, "Hi").await;
        let second = root(&repo, &alice, &topic, "Second").await;
        let answer = reply(&repo, &alice, &hi).await;
        reply(&repo, &alice, &answer).await;

        let roots = repo.list_roots(topic.id).await.unwrap();
        assert_eq!(roots.iter().map(|p| p.id).collect::<Vec<_>>(), vec![hi.id, second.id]);
        assert_eq!(roots[0].author_name, "alice");

        let replies = repo.list_replies(hi.id).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].topic_id, None);
        assert_eq!(repo.list_posts_by_author(alice.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn second_vote_on_same_pair_conflicts() {
        let repo = repo().await;
        let alice = member(&repo, "alice").await;
        let topic = repo.get_or_create_topic("General").await.unwrap();
        let post = root(&repo, &alice, &topic, "Hi").await;

        repo.insert_vote(alice.id, post.id).await.unwrap();
        let err = repo.insert_vote(alice.id, post.id).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(repo.count_votes(post.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn racing_vote_inserts_leave_one_row() {
        let repo = Arc::new(repo().await);
        let alice = member(&repo, "alice").await;
        let topic = repo.get_or_create_topic("General").await.unwrap();
        let post = root(&repo, &alice, &topic, "Hi").await;
        let (user_id, post_id) = (alice.id, post.id);

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.insert_vote(user_id, post_id).await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(matches!(e, AppError::Conflict(_))),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(repo.count_votes(post.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleting_a_root_removes_subtree_and_votes() {
        let repo = repo().await;
        let alice = member(&repo, "alice").await;
        let bob = member(&repo, "bob").await;
        let topic = repo.get_or_create_topic("General").await.unwrap();

        let doomed = root(&repo, &alice, &topic, "Doomed").await;
        let kept = root(&repo, &alice, &topic, "Kept").await;
        let child = reply(&repo, &bob, &doomed).await;
        let grandchild = reply(&repo, &alice, &child).await;
        repo.insert_vote(bob.id, doomed.id).await.unwrap();
        repo.insert_vote(alice.id, grandchild.id).await.unwrap();
        repo.insert_vote(bob.id, kept.id).await.unwrap();

        assert_eq!(repo.delete_post_tree(doomed.id).await.unwrap(), 3);

        assert!(repo.get_post(grandchild.id).await.unwrap().is_none());
        assert!(repo.find_vote(alice.id, grandchild.id).await.unwrap().is_none());
        assert_eq!(repo.list_roots(topic.id).await.unwrap().len(), 1);
        assert_eq!(repo.count_votes(kept.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn meta_upsert_keeps_one_row_per_key() {
        let repo = repo().await;
        let alice = member(&repo, "alice").await;

        let first = repo.set_meta(alice.id, "page", "draft").await.unwrap();
        let second = repo.set_meta(alice.id, "page", "hello world").await.unwrap();

        assert_eq!(first.id, second.id);
        let stored = repo.get_meta(alice.id, "page").await.unwrap().unwrap();
        assert_eq!(stored.value, "hello world");
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let repo = repo().await;
        member(&repo, "alice").await;

        let err = repo
            .create_user(NewUser {
                username: "alice".into(),
                email: String::new(),
                password_hash: "hash".into(),
                is_staff: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn credentials_and_last_login() {
        let repo = repo().await;
        let alice = member(&repo, "alice").await;
        assert!(alice.last_login.is_none());

        let (found, hash) = repo.find_credentials("alice").await.unwrap().unwrap();
        assert_eq!(found.id, alice.id);
        assert_eq!(hash, "hash");

        repo.touch_last_login(alice.id).await.unwrap();
        assert!(repo.get_user(alice.id).await.unwrap().unwrap().last_login.is_some());
        assert!(repo.find_credentials("nobody").await.unwrap().is_none());
    }
}
