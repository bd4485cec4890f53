use std::fmt;

use zeroize::Zeroizing;

/// An authenticated user, as handed back by the external identity provider.
///
/// Created once per sign-in and passed explicitly to everything that talks to
/// the backing store. The access token is wiped from memory on drop.
#[derive(Clone)]
pub struct AuthSession {
    pub user_id: String,
    pub email: Option<String>,
    access_token: Zeroizing<String>,
}

impl AuthSession {
    pub fn new(user_id: impl Into<String>, email: Option<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email,
            access_token: Zeroizing::new(access_token.into()),
        }
    }

    /// Bearer token for requests made on behalf of this user.
    pub fn access_token(&self) -> &str {
        self.access_token.as_str()
    }
}

// Keeps the token out of logs.
impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .finish()
    }
}
