//! Session context.
//!
//! The authenticated user and bearer token are handed to the client
//! explicitly, at construction and whenever they change (login, logout,
//! token refresh). Components read them from here and nowhere else.

use std::fmt;

use revline_proto::UserId;

/// Bearer token attached to the transport at connect time.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for building the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Who the subsystem is acting for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    /// Authenticated user. `None` for anonymous visitors; unread polling is
    /// skipped without it.
    pub user_id: Option<UserId>,
    /// Bearer token. `None` until login.
    pub token: Option<AuthToken>,
}

impl SessionContext {
    /// Anonymous session: no user, no token.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Authenticated session.
    pub fn authenticated(user_id: UserId, token: AuthToken) -> Self {
        Self { user_id: Some(user_id), token: Some(token) }
    }

    /// Whether a token is present.
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_debug_is_redacted() {
        let token = AuthToken::new("eyJhbGciOi.secret");
        assert!(!format!("{token:?}").contains("secret"));

        let session = SessionContext::authenticated(UserId::new("u1").unwrap(), token);
        assert!(!format!("{session:?}").contains("secret"));
        assert!(session.is_authenticated());
        assert!(!SessionContext::anonymous().is_authenticated());
    }
}
