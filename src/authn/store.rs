//! Stored credentials for basic authentication.

use crate::config::BasicUserConfig;
use crate::error::ConfigError;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use std::collections::HashMap;
use std::fmt;

const NOOP_PREFIX: &str = "{noop}";
const ARGON2_PREFIX: &str = "{argon2}";

/// A stored password with its encoder.
///
/// Parsed from the `{encoder}value` form: `{noop}secret` and plain `secret`
/// are compared as text, `{argon2}$argon2id$...` is verified as a PHC hash.
#[derive(Clone, PartialEq, Eq)]
pub enum StoredPassword {
    /// Plain text.
    Plain(String),
    /// Argon2 PHC string.
    Argon2(String),
}

impl StoredPassword {
    /// Parse an encoded password for `user`.
    ///
    /// # Example
    /// ```
    /// use axum_guard::StoredPassword;
    ///
    /// let password = StoredPassword::parse("alice", "{noop}secret").unwrap();
    /// assert!(password.verify("secret"));
    /// assert!(StoredPassword::parse("alice", "{bcrypt}$2a$10$...").is_err());
    /// ```
    pub fn parse(user: &str, encoded: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPassword {
            user: user.to_string(),
            reason,
        };

        if let Some(plain) = encoded.strip_prefix(NOOP_PREFIX) {
            return Ok(Self::Plain(plain.to_string()));
        }
        if let Some(hash) = encoded.strip_prefix(ARGON2_PREFIX) {
            PasswordHash::new(hash).map_err(|e| invalid(format!("invalid argon2 hash: {}", e)))?;
            return Ok(Self::Argon2(hash.to_string()));
        }
        if encoded.starts_with('{') {
            if let Some(end) = encoded.find('}') {
                return Err(invalid(format!("unknown password encoder '{}'", &encoded[..=end])));
            }
        }
        Ok(Self::Plain(encoded.to_string()))
    }

    /// Check a presented password.
    pub fn verify(&self, candidate: &str) -> bool {
        match self {
            Self::Plain(stored) => constant_time_eq(stored.as_bytes(), candidate.as_bytes()),
            Self::Argon2(hash) => PasswordHash::new(hash)
                .map(|parsed| {
                    Argon2::default()
                        .verify_password(candidate.as_bytes(), &parsed)
                        .is_ok()
                })
                .unwrap_or(false),
        }
    }
}

impl fmt::Debug for StoredPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Plain(***)"),
            Self::Argon2(_) => f.write_str("Argon2(***)"),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// A user known to an [`IdentityStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIdentity {
    /// Login name.
    pub username: String,
    /// Stored password.
    pub password: StoredPassword,
    /// Roles, not yet prefixed.
    pub roles: Vec<String>,
}

impl StoredIdentity {
    /// Create an identity.
    pub fn new<I, R>(username: impl Into<String>, password: StoredPassword, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            username: username.into(),
            password,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

/// Looks up users for basic authentication.
pub trait IdentityStore: Send + Sync {
    /// Find a user by login name.
    fn lookup(&self, username: &str) -> Option<StoredIdentity>;
}

/// An [`IdentityStore`] holding users in memory.
///
/// # Example
/// ```
/// use axum_guard::{IdentityStore, InMemoryIdentityStore, StoredIdentity, StoredPassword};
///
/// let store = InMemoryIdentityStore::new().with_user(StoredIdentity::new(
///     "alice",
///     StoredPassword::Plain("secret".into()),
///     ["USER"],
/// ));
/// assert!(store.lookup("alice").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityStore {
    users: HashMap<String, StoredIdentity>,
}

impl InMemoryIdentityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user. A later user with the same name replaces an earlier one.
    pub fn with_user(mut self, identity: StoredIdentity) -> Self {
        self.users.insert(identity.username.clone(), identity);
        self
    }

    /// Build a store from configured users.
    pub fn from_config(users: &[BasicUserConfig]) -> Result<Self, ConfigError> {
        users.iter().try_fold(Self::new(), |store, user| {
            let password = StoredPassword::parse(&user.name, &user.password)?;
            let roles = user.roles.iter().cloned();
            Ok(store.with_user(StoredIdentity::new(&user.name, password, roles)))
        })
    }

    /// Number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the store has no users.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn lookup(&self, username: &str) -> Option<StoredIdentity> {
        self.users.get(username).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::SaltString;
    use argon2::PasswordHasher;

    fn argon2_hash(password: &str) -> String {
        let salt = SaltString::encode_b64(b"somesaltsomesalt").unwrap();
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_plain_passwords() {
        let noop = StoredPassword::parse("u", "{noop}s3cret").unwrap();
        assert_eq!(noop, StoredPassword::Plain("s3cret".to_string()));
        assert!(noop.verify("s3cret"));
        assert!(!noop.verify("s3cre"));
        assert!(!noop.verify("wrong!"));

        let bare = StoredPassword::parse("u", "s3cret").unwrap();
        assert!(bare.verify("s3cret"));
    }

    #[test]
    fn test_argon2_password() {
        let encoded = format!("{{argon2}}{}", argon2_hash("hunter2"));
        let password = StoredPassword::parse("u", &encoded).unwrap();
        assert!(matches!(password, StoredPassword::Argon2(_)));
        assert!(password.verify("hunter2"));
        assert!(!password.verify("hunter3"));
    }

    #[test]
    fn test_invalid_encodings() {
        assert!(matches!(
            StoredPassword::parse("bob", "{bcrypt}$2a$10$abc"),
            Err(ConfigError::InvalidPassword { user, .. }) if user == "bob"
        ));
        assert!(StoredPassword::parse("bob", "{argon2}not-a-hash").is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let password = StoredPassword::Plain("s3cret".to_string());
        assert!(!format!("{:?}", password).contains("s3cret"));
    }

    #[test]
    fn test_store_from_config() {
        let users = vec![
            BasicUserConfig {
                name: "alice".to_string(),
                password: "{noop}pw".to_string(),
                roles: vec!["USER".to_string()],
            },
            BasicUserConfig {
                name: "bob".to_string(),
                password: "pw2".to_string(),
                roles: vec![],
            },
        ];
        let store = InMemoryIdentityStore::from_config(&users).unwrap();
        assert_eq!(store.len(), 2);
        let alice = store.lookup("alice").unwrap();
        assert_eq!(alice.roles, vec!["USER".to_string()]);
        assert!(alice.password.verify("pw"));
        assert!(store.lookup("carol").is_none());
    }
}
