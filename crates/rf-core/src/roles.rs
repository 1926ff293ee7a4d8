//! # Roles
//!
//! Capability view over a [`User`]: staff accounts are admins, everybody else
//! is a member.

use crate::models::{Post, User};

/// Static personal page shown for every admin account.
pub const ADMIN_PAGE: &str = "This is an administrator account.";

/// `UserMeta` key holding a member's personal page.
pub const PAGE_KEY: &str = "page";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// May create and rename topics. Has a fixed personal page.
    Admin(User),
    /// May edit a free-text personal page.
    Member(User),
}

/// Resolves the capability variant from the staff flag.
pub fn resolve_role(user: User) -> Role {
    if user.is_staff {
        Role::Admin(user)
    } else {
        Role::Member(user)
    }
}

impl Role {
    pub fn user(&self) -> &User {
        match self {
            Role::Admin(user) | Role::Member(user) => user,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin(_))
    }

    pub fn can_manage_topics(&self) -> bool {
        self.is_admin()
    }

    /// Authors may delete their own posts; admins may delete any post.
    pub fn can_delete(&self, post: &Post) -> bool {
        self.is_admin() || post.author_id == self.user().id
    }
}

/// Public page of a user: the shared read-only surface of both roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub role: Role,
    pub posts: Vec<Post>,
    /// Personal page text, `None` for a member who never set one
    pub page: Option<String>,
}

impl UserProfile {
    pub fn user(&self) -> &User {
        self.role.user()
    }

    pub fn display_name(&self) -> &str {
        &self.user().username
    }

    pub fn post_count(&self) -> usize {
        self.posts.len()
    }
}
