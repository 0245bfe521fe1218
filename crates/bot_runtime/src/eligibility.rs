//! SQLite-backed eligibility source
//!
//! Reads `users(id, is_blocked)` and `chats(id, is_permitted)`. A subject
//! without a row is eligible: unknown users are not blocked and unknown
//! chats are permitted. The database is opened read-only; the bot never
//! writes profile data.

use async_trait::async_trait;
use bot_admission::{Eligibility, EligibilityError, EligibilitySource};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SqliteEligibility {
    db_path: PathBuf,
}

impl SqliteEligibility {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn with_connection<T, F>(&self, func: F) -> Result<T, EligibilityError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let connection = open_connection(&db_path)?;
            func(&connection)
        })
        .await
        .map_err(|error| EligibilityError::Unavailable(format!("lookup task failed: {error}")))?
        .map_err(|error| EligibilityError::Unavailable(error.to_string()))
    }
}

#[async_trait]
impl EligibilitySource for SqliteEligibility {
    async fn lookup(&self, user_id: i64, chat_id: i64) -> Result<Eligibility, EligibilityError> {
        self.with_connection(move |connection| {
            let user_blocked: Option<bool> = connection
                .query_row(
                    "SELECT is_blocked FROM users WHERE id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;
            let chat_permitted: Option<bool> = connection
                .query_row(
                    "SELECT is_permitted FROM chats WHERE id = ?1",
                    params![chat_id],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(Eligibility {
                user_blocked: user_blocked.unwrap_or(false),
                chat_permitted: chat_permitted.unwrap_or(true),
            })
        })
        .await
    }
}

fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(path: &Path) {
        let connection = Connection::open(path).unwrap();
        connection
            .execute_batch(
                r#"
                CREATE TABLE users (id INTEGER PRIMARY KEY, is_blocked INTEGER NOT NULL DEFAULT 0);
                CREATE TABLE chats (id INTEGER PRIMARY KEY, is_permitted INTEGER NOT NULL DEFAULT 1);
                INSERT INTO users (id, is_blocked) VALUES (1, 0), (2, 1);
                INSERT INTO chats (id, is_permitted) VALUES (-100, 1), (-200, 0);
                "#,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_lookup_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.db");
        seed(&path);
        let source = SqliteEligibility::new(&path);

        let ok = source.lookup(1, -100).await.unwrap();
        assert_eq!(
            ok,
            Eligibility {
                user_blocked: false,
                chat_permitted: true
            }
        );
        assert!(source.lookup(2, -100).await.unwrap().user_blocked);
        assert!(!source.lookup(1, -200).await.unwrap().chat_permitted);
    }

    #[tokio::test]
    async fn test_missing_rows_are_eligible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.db");
        seed(&path);
        let source = SqliteEligibility::new(&path);

        assert_eq!(source.lookup(999, -999).await.unwrap(), Eligibility::default());
    }

    #[tokio::test]
    async fn test_missing_database_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteEligibility::new(dir.path().join("absent.db"));

        let result = source.lookup(1, 1).await;
        assert!(matches!(result, Err(EligibilityError::Unavailable(_))));
    }
}
