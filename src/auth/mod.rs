//! Who is signed in.
//!
//! ## Design Decisions
//! - The session core only needs to know whether a user is present and what
//!   to call them; credential handling lives outside this crate.
//! - [`Authenticator`] is the seam. The terminal front end uses
//!   [`StaticAuthenticator`], filled from configuration or the `--user` flag.

use serde::{Deserialize, Serialize};

/// The authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
}

impl UserProfile {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

pub trait Authenticator: Send + Sync {
    /// `None` when nobody is signed in.
    fn current_user(&self) -> Option<UserProfile>;
}

/// Fixed user, or nobody.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    user: Option<UserProfile>,
}

impl StaticAuthenticator {
    /// Blank usernames count as signed out.
    pub fn new(username: Option<&str>) -> Self {
        let user = username
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(UserProfile::new);
        Self { user }
    }
}

impl Authenticator for StaticAuthenticator {
    fn current_user(&self) -> Option<UserProfile> {
        self.user.clone()
    }
}
