//! Credential verification in front of every actuation.

use std::sync::{Arc, OnceLock};

use chrono::Utc;

use crate::credentials::CredentialStore;
use crate::error::{Result, ZvezdaError};
use crate::password;

/// A principal whose credentials have been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// Hash verified against when the username does not exist, so an unknown
/// user costs the same Argon2 work as a wrong password.
fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| password::hash_password("zvezda-timing-equalizer").ok())
        .as_deref()
}

/// Verifies username/secret pairs against a [`CredentialStore`].
///
/// Every failure collapses into `ZvezdaError::Unauthorized`; the reason is
/// only logged. Verification is CPU bound, so async callers should run
/// [`AuthGate::authenticate`] on a blocking thread.
#[derive(Clone)]
pub struct AuthGate {
    store: Arc<dyn CredentialStore>,
}

impl AuthGate {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub fn authenticate(&self, username: &str, secret: &str) -> Result<Identity> {
        let credential = match self.store.lookup(username) {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(username, error = %e, "credential lookup failed");
                None
            }
        };

        let Some(credential) = credential else {
            if let Some(hash) = dummy_hash() {
                let _ = password::verify_password(secret, hash);
            }
            tracing::info!(username, "authentication failed: unknown user");
            return Err(ZvezdaError::Unauthorized);
        };

        match password::verify_password(secret, &credential.hash) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(username, "authentication failed: wrong password");
                return Err(ZvezdaError::Unauthorized);
            }
            Err(e) => {
                tracing::error!(username, error = %e, "stored credential is unreadable");
                return Err(ZvezdaError::Unauthorized);
            }
        }

        if let Err(e) = self.store.touch_last_used(username, Utc::now()) {
            tracing::warn!(username, error = %e, "failed to record last use");
        }
        Ok(Identity::new(username))
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, UserDb};
    use chrono::DateTime;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn gate_with(username: &str, secret: &str) -> (TempDir, Arc<UserDb>, AuthGate) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(UserDb::open(&dir.path().join("users.db")).unwrap());
        let hash = password::hash_password(secret).unwrap();
        db.create(&Credential::new(username, hash)).unwrap();
        let gate = AuthGate::new(db.clone());
        (dir, db, gate)
    }

    /// Store whose lookups work but whose writes always fail.
    struct ReadOnlyStore {
        credential: Credential,
        touches: Mutex<usize>,
    }

    impl CredentialStore for ReadOnlyStore {
        fn lookup(&self, username: &str) -> Result<Option<Credential>> {
            Ok((username == self.credential.username).then(|| self.credential.clone()))
        }

        fn touch_last_used(&self, _username: &str, _at: DateTime<Utc>) -> Result<()> {
            *self.touches.lock().unwrap() += 1;
            Err(ZvezdaError::CredentialDb("read-only".into()))
        }
    }

    struct BrokenStore;

    impl CredentialStore for BrokenStore {
        fn lookup(&self, _username: &str) -> Result<Option<Credential>> {
            Err(ZvezdaError::CredentialDb("disk gone".into()))
        }

        fn touch_last_used(&self, _username: &str, _at: DateTime<Utc>) -> Result<()> {
            Err(ZvezdaError::CredentialDb("disk gone".into()))
        }
    }

    #[test]
    fn valid_credentials_yield_identity_and_touch_last_used() {
        let (_dir, db, gate) = gate_with("alice", "correct-horse");
        let identity = gate.authenticate("alice", "correct-horse").unwrap();
        assert_eq!(identity, Identity::new("alice"));
        assert!(db.lookup("alice").unwrap().unwrap().last_used_at.is_some());
    }

    #[test]
    fn wrong_password_and_unknown_user_fail_identically() {
        let (_dir, db, gate) = gate_with("alice", "correct-horse");

        let wrong = gate.authenticate("alice", "wrong-horse").unwrap_err();
        let unknown = gate.authenticate("mallory", "correct-horse").unwrap_err();

        assert!(matches!(wrong, ZvezdaError::Unauthorized));
        assert!(matches!(unknown, ZvezdaError::Unauthorized));
        assert_eq!(wrong.to_string(), unknown.to_string());
        assert!(db.lookup("alice").unwrap().unwrap().last_used_at.is_none());
    }

    #[test]
    fn failed_touch_does_not_fail_authentication() {
        let hash = password::hash_password("correct-horse").unwrap();
        let store = Arc::new(ReadOnlyStore {
            credential: Credential::new("alice", hash),
            touches: Mutex::new(0),
        });
        let gate = AuthGate::new(store.clone());

        assert!(gate.authenticate("alice", "correct-horse").is_ok());
        assert_eq!(*store.touches.lock().unwrap(), 1);
    }

    #[test]
    fn store_failure_is_unauthorized() {
        let gate = AuthGate::new(Arc::new(BrokenStore));
        assert!(matches!(
            gate.authenticate("alice", "whatever"),
            Err(ZvezdaError::Unauthorized)
        ));
    }

    #[test]
    fn corrupt_stored_hash_is_unauthorized() {
        let store = Arc::new(ReadOnlyStore {
            credential: Credential::new("alice", "plaintext?"),
            touches: Mutex::new(0),
        });
        let gate = AuthGate::new(store.clone());
        assert!(matches!(
            gate.authenticate("alice", "plaintext?"),
            Err(ZvezdaError::Unauthorized)
        ));
        assert_eq!(*store.touches.lock().unwrap(), 0);
    }
}
