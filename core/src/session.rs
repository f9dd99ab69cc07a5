//! Session token value object.
//!
//! Holds no lock of its own; `Service` serializes every access. Getters on
//! an invalid (empty or expired) token report the empty state instead of the
//! stale fields, which stay in place until `clear`.

use crate::user::UserEntity;

/// Current time in epoch seconds.
pub(crate) fn now_epoch() -> i64 {
    jiff::Timestamp::now().as_second()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionToken {
    token: String,
    expire_at: i64,
    user: UserEntity,
}

impl SessionToken {
    pub fn new(token: impl Into<String>, expire_at: i64) -> Self {
        Self {
            token: token.into(),
            expire_at,
            user: UserEntity::default(),
        }
    }

    pub fn with_user(mut self, user: UserEntity) -> Self {
        self.user = user;
        self
    }

    /// True when `expire_at` is not strictly in the future.
    pub fn is_expired(expire_at: i64) -> bool {
        expire_at <= now_epoch()
    }

    pub fn is_valid(&self) -> bool {
        !self.token.is_empty() && !Self::is_expired(self.expire_at)
    }

    /// Token string, or `""` when invalid.
    pub fn token(&self) -> &str {
        if self.is_valid() {
            &self.token
        } else {
            ""
        }
    }

    /// Expiry in epoch seconds, or 0 when invalid.
    pub fn expire_at(&self) -> i64 {
        if self.is_valid() {
            self.expire_at
        } else {
            0
        }
    }

    /// Snapshot of the logged-in user, or an empty snapshot when invalid.
    pub fn user(&self) -> UserEntity {
        if self.is_valid() {
            self.user.clone()
        } else {
            UserEntity::default()
        }
    }

    /// True when a token is stored but its expiry has passed.
    pub(crate) fn is_stale(&self) -> bool {
        !self.token.is_empty() && Self::is_expired(self.expire_at)
    }

    pub fn clear(&mut self) {
        self.token.clear();
        self.expire_at = 0;
        self.user = UserEntity::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserEntity {
        UserEntity {
            id: "u1".to_string(),
            username: "alice".to_string(),
            ..UserEntity::default()
        }
    }

    #[test]
    fn default_token_is_invalid() {
        let token = SessionToken::default();
        assert!(!token.is_valid());
        assert_eq!(token.token(), "");
        assert_eq!(token.expire_at(), 0);
        assert_eq!(token.user(), UserEntity::default());
    }

    #[test]
    fn future_expiry_is_valid() {
        let expire = now_epoch() + 3600;
        let token = SessionToken::new("tok", expire).with_user(user());
        assert!(token.is_valid());
        assert_eq!(token.token(), "tok");
        assert_eq!(token.expire_at(), expire);
        assert_eq!(token.user().username, "alice");
    }

    #[test]
    fn expired_token_reports_empty_state_but_keeps_fields() {
        let token = SessionToken::new("tok", now_epoch() - 1).with_user(user());
        assert!(!token.is_valid());
        assert_eq!(token.token(), "");
        assert_eq!(token.expire_at(), 0);
        assert_eq!(token.user(), UserEntity::default());
        assert!(token.is_stale());
        assert_eq!(token.token, "tok");
    }

    #[test]
    fn expiry_equal_to_now_is_expired() {
        assert!(SessionToken::is_expired(now_epoch()));
        assert!(!SessionToken::is_expired(now_epoch() + 60));
    }

    #[test]
    fn empty_string_with_future_expiry_is_invalid() {
        let token = SessionToken::new("", now_epoch() + 3600);
        assert!(!token.is_valid());
        assert!(!token.is_stale());
    }

    #[test]
    fn clear_resets_everything() {
        let mut token = SessionToken::new("tok", now_epoch() + 3600).with_user(user());
        token.clear();
        assert_eq!(token, SessionToken::default());
    }
}
