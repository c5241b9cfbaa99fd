//! Authenticated user session, supplied by the host application

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

/// Who is signed in, and the bearer token for the sync API
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub session_token: SecretString,
}

impl Session {
    pub fn new(user_id: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_token: SecretString::new(session_token.into()),
        }
    }

    /// # Errors
    ///
    /// [`SyncError::Validation`] when the user id or token is blank.
    pub fn validate(&self) -> SyncResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(SyncError::Validation("session has no user id".into()));
        }
        if self.session_token.expose_secret().trim().is_empty() {
            return Err(SyncError::Validation("session has no token".into()));
        }
        Ok(())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The active session, or `None` when nobody is signed in
    async fn current_session(&self) -> SyncResult<Option<Session>>;
}

/// Fixed session, for the ops CLI and tests
#[derive(Debug, Clone)]
pub struct StaticSessionProvider {
    session: Session,
}

impl StaticSessionProvider {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn current_session(&self) -> SyncResult<Option<Session>> {
        Ok(Some(self.session.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_not_debug_printed() {
        let session = Session::new("amina", "tok-123456");
        let printed = format!("{session:?}");
        assert!(printed.contains("amina"));
        assert!(!printed.contains("tok-123456"));
    }

    #[test]
    fn test_blank_session_is_invalid() {
        assert!(Session::new("", "t").validate().is_err());
        assert!(Session::new("u", "  ").validate().is_err());
        assert!(Session::new("u", "t").validate().is_ok());
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticSessionProvider::new(Session::new("u1", "t1"));
        let session = provider.current_session().await.unwrap().unwrap();
        assert_eq!(session.user_id, "u1");
    }
}
