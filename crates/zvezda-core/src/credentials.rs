//! Credential storage.
//!
//! [`CredentialStore`] is the narrow view the auth gate needs. [`UserDb`]
//! implements it on top of redb and adds the administrative operations used
//! by `zvezda user`.
//!
//! # Table design
//!
//! A single `USERS` table keyed by username; values are JSON-encoded
//! [`Credential`] records. redb serializes write transactions across request
//! handlers. The database file is locked by the process that opened it, so
//! `zvezda user` cannot modify it while `zvezda serve` is running.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZvezdaError};

const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    /// Argon2id PHC string.
    pub hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(username: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            hash: hash.into(),
            created_at: Utc::now(),
            last_used_at: None,
        }
    }
}

/// Usernames travel in HTTP Basic credentials, where ':' separates the
/// username from the secret.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.contains(':') || username.chars().any(char::is_whitespace) {
        return Err(ZvezdaError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

/// Read side of credential storage as seen by the auth gate.
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, username: &str) -> Result<Option<Credential>>;

    fn touch_last_used(&self, username: &str, at: DateTime<Utc>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// UserDb
// ---------------------------------------------------------------------------

fn db_err(e: impl std::fmt::Display) -> ZvezdaError {
    ZvezdaError::CredentialDb(e.to_string())
}

pub struct UserDb {
    db: Database,
}

impl UserDb {
    /// Open or create the database at `path`, creating the users table.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(USERS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Insert a new user. Fails if the username is taken.
    pub fn create(&self, credential: &Credential) -> Result<()> {
        validate_username(&credential.username)?;
        let value = serde_json::to_vec(credential)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(USERS).map_err(db_err)?;
            if table
                .get(credential.username.as_str())
                .map_err(db_err)?
                .is_some()
            {
                return Err(ZvezdaError::UserExists(credential.username.clone()));
            }
            table
                .insert(credential.username.as_str(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Replace the password hash of an existing user.
    pub fn update_hash(&self, username: &str, hash: &str) -> Result<()> {
        self.modify(username, |c| c.hash = hash.to_string())
    }

    /// All users, sorted by username.
    pub fn list(&self) -> Result<Vec<Credential>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(USERS).map_err(db_err)?;
        let mut users = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            users.push(serde_json::from_slice::<Credential>(v.value())?);
        }
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    /// Read-modify-write of one record inside a single write transaction.
    fn modify(&self, username: &str, f: impl FnOnce(&mut Credential)) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(USERS).map_err(db_err)?;
            let existing = table
                .get(username)
                .map_err(db_err)?
                .ok_or_else(|| ZvezdaError::UserNotFound(username.to_string()))?;
            let mut credential: Credential = serde_json::from_slice(existing.value())?;
            drop(existing);
            f(&mut credential);
            let value = serde_json::to_vec(&credential)?;
            table.insert(username, value.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }
}

impl CredentialStore for UserDb {
    fn lookup(&self, username: &str) -> Result<Option<Credential>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(USERS).map_err(db_err)?;
        let Some(value) = table.get(username).map_err(db_err)? else {
            return Ok(None);
        };
        let credential = serde_json::from_slice(value.value())?;
        Ok(Some(credential))
    }

    fn touch_last_used(&self, username: &str, at: DateTime<Utc>) -> Result<()> {
        self.modify(username, |c| c.last_used_at = Some(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, UserDb) {
        let dir = TempDir::new().unwrap();
        let db = UserDb::open(&dir.path().join("users.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn create_and_lookup() {
        let (_dir, db) = open_tmp();
        db.create(&Credential::new("alice", "$argon2id$fake")).unwrap();

        let found = db.lookup("alice").unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert_eq!(found.hash, "$argon2id$fake");
        assert!(found.last_used_at.is_none());
        assert!(db.lookup("bob").unwrap().is_none());
    }

    #[test]
    fn create_rejects_duplicate_username() {
        let (_dir, db) = open_tmp();
        db.create(&Credential::new("alice", "h1")).unwrap();
        let err = db.create(&Credential::new("alice", "h2")).unwrap_err();
        assert!(matches!(err, ZvezdaError::UserExists(ref u) if u == "alice"));
        assert_eq!(db.lookup("alice").unwrap().unwrap().hash, "h1");
    }

    #[test]
    fn create_rejects_usernames_unusable_in_basic_auth() {
        let (_dir, db) = open_tmp();
        for bad in ["", "ali:ce", "ali ce"] {
            assert!(matches!(
                db.create(&Credential::new(bad, "h")),
                Err(ZvezdaError::InvalidUsername(_))
            ));
        }
    }

    #[test]
    fn update_hash_replaces_only_hash() {
        let (_dir, db) = open_tmp();
        let original = Credential::new("alice", "h1");
        db.create(&original).unwrap();
        db.update_hash("alice", "h2").unwrap();

        let updated = db.lookup("alice").unwrap().unwrap();
        assert_eq!(updated.hash, "h2");
        assert_eq!(updated.created_at, original.created_at);
    }

    #[test]
    fn update_unknown_user_fails() {
        let (_dir, db) = open_tmp();
        assert!(matches!(
            db.update_hash("ghost", "h"),
            Err(ZvezdaError::UserNotFound(_))
        ));
    }

    #[test]
    fn touch_last_used_records_timestamp() {
        let (_dir, db) = open_tmp();
        db.create(&Credential::new("alice", "h")).unwrap();
        let at = Utc::now();
        db.touch_last_used("alice", at).unwrap();
        assert_eq!(db.lookup("alice").unwrap().unwrap().last_used_at, Some(at));
    }

    #[test]
    fn list_is_sorted_by_username() {
        let (_dir, db) = open_tmp();
        for name in ["carol", "alice", "bob"] {
            db.create(&Credential::new(name, "h")).unwrap();
        }
        let names: Vec<String> = db.list().unwrap().into_iter().map(|c| c.username).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.db");
        {
            let db = UserDb::open(&path).unwrap();
            db.create(&Credential::new("alice", "h")).unwrap();
        }
        let db = UserDb::open(&path).unwrap();
        assert!(db.lookup("alice").unwrap().is_some());
    }
}
