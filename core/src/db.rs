use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};

use crate::error::{Error, Result};
use crate::models::User;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the SQLite connection; every table is migrated before first use.
///
/// Concurrency control is the schema's unique constraints. Several
/// `Database` handles (or processes) may point at the same file; writers
/// wait on the busy timeout rather than failing. Transactions that read
/// before they write take the write lock up front (see
/// [`Database::write_transaction`]), so a concurrent commit can never
/// invalidate their snapshot.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open a `BEGIN IMMEDIATE` transaction for read-then-write work.
    ///
    /// A deferred transaction in WAL mode fails with `SQLITE_BUSY_SNAPSHOT`
    /// when another connection commits between its read and its first
    /// write, and the busy timeout does not cover that case.
    pub(crate) fn write_transaction(&self) -> Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate).map_err(Error::from)
    }

    /// Run `f` inside one write transaction: everything it writes commits
    /// together, or nothing does when it returns an error.
    ///
    /// `f` must only call operations that do not open a transaction of
    /// their own.
    pub fn atomically<T, E>(&self, f: impl FnOnce(&Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<Error>,
    {
        let tx = self.write_transaction()?;
        let value = f(self)?;
        tx.commit().map_err(Error::from)?;
        Ok(value)
    }

    #[allow(clippy::too_many_lines)]
    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            tracing::info!("applying schema v1");
            self.conn.execute_batch(
                "BEGIN;

                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    name_key TEXT NOT NULL,
                    unit TEXT NOT NULL,
                    category TEXT,
                    owner_user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
                    image_path TEXT,
                    created_at TEXT NOT NULL,
                    UNIQUE (owner_user_id, name_key)
                );

                -- NULL owners are distinct in the composite key above, so the
                -- global tier needs its own partial index.
                CREATE UNIQUE INDEX IF NOT EXISTS idx_ingredients_global_key
                    ON ingredients(name_key) WHERE owner_user_id IS NULL;

                CREATE TABLE IF NOT EXISTS pantry (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id) ON DELETE CASCADE,
                    quantity_hundredths INTEGER NOT NULL CHECK (quantity_hundredths >= 0),
                    unit TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (user_id, ingredient_id)
                );

                CREATE TABLE IF NOT EXISTS shopping (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id) ON DELETE CASCADE,
                    quantity_hundredths INTEGER NOT NULL CHECK (quantity_hundredths >= 0),
                    unit TEXT NOT NULL,
                    source TEXT NOT NULL CHECK (source IN ('manual', 'auto')),
                    checked INTEGER NOT NULL DEFAULT 0,
                    checked_at TEXT,
                    updated_at TEXT NOT NULL,
                    UNIQUE (user_id, ingredient_id)
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    servings INTEGER,
                    image_path TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (user_id, slug)
                );

                CREATE TABLE IF NOT EXISTS recipe_steps (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    position INTEGER NOT NULL CHECK (position >= 1),
                    instruction TEXT NOT NULL,
                    UNIQUE (recipe_id, position)
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id) ON DELETE CASCADE,
                    quantity_hundredths INTEGER NOT NULL CHECK (quantity_hundredths > 0),
                    UNIQUE (recipe_id, ingredient_id)
                );

                CREATE TABLE IF NOT EXISTS meal_plans (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    date TEXT NOT NULL,
                    validated INTEGER NOT NULL DEFAULT 0,
                    validated_at TEXT,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, recipe_id, date)
                );

                CREATE TABLE IF NOT EXISTS meal_cooked_prompts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    date TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending', 'sent', 'answered', 'expired')),
                    answer TEXT CHECK (answer IN ('yes', 'no')),
                    sent_at TEXT,
                    answered_at TEXT,
                    expired_at TEXT,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, date)
                );

                CREATE TABLE IF NOT EXISTS daily_meal_suggestions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    date TEXT NOT NULL,
                    status TEXT NOT NULL
                        CHECK (status IN ('proposed', 'none_possible', 'dismissed', 'accepted')),
                    recipe_id INTEGER REFERENCES recipes(id) ON DELETE SET NULL,
                    meal_plan_id INTEGER REFERENCES meal_plans(id) ON DELETE SET NULL,
                    context TEXT NOT NULL,
                    meta TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    decided_at TEXT,
                    UNIQUE (user_id, date)
                );

                CREATE INDEX IF NOT EXISTS idx_meal_plans_user_date ON meal_plans(user_id, date);
                CREATE INDEX IF NOT EXISTS idx_prompts_status_date ON meal_cooked_prompts(status, date);
                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_recipe ON recipe_ingredients(recipe_id);

                PRAGMA user_version = 1;
                COMMIT;",
            )?;
        }

        Ok(())
    }

    // --- Users ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
        })
    }

    /// Return the user with this name, creating it on first use.
    pub fn ensure_user(&self, name: &str) -> Result<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid("User name must not be blank"));
        }
        let inserted = self.conn.execute(
            "INSERT INTO users (name, created_at) VALUES (?1, ?2)
             ON CONFLICT(name) DO NOTHING",
            params![name, now()],
        )?;
        if inserted > 0 {
            tracing::info!(user = name, "created user");
        }
        self.get_user_by_name(name)?
            .ok_or_else(|| Error::not_found(format!("User '{name}'")))
    }

    pub fn get_user(&self, id: i64) -> Result<User> {
        self.conn
            .query_row(
                "SELECT id, name, created_at FROM users WHERE id = ?1",
                params![id],
                Self::user_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found(format!("User {id}")))
    }

    pub fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM users WHERE name = ?1",
                params![name.trim()],
                Self::user_from_row,
            )
            .optional()?)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM users ORDER BY id")?;
        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub(crate) fn require_user(&self, id: i64) -> Result<()> {
        self.get_user(id).map(|_| ())
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// True when an insert lost a race against a unique index.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_runs_migrations() {
        let db = Database::open_in_memory().unwrap();
        let version: i64 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_reopen_on_disk_is_noop_migration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("larder.db");
        {
            let db = Database::open(&path).unwrap();
            db.ensure_user("alice").unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_ensure_user_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let first = db.ensure_user("alice").unwrap();
        let second = db.ensure_user("  alice ").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_ensure_user_rejects_blank() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.ensure_user("   "), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_get_user_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_user(42), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_is_unique_violation_detects_duplicate_insert() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO users (name, created_at) VALUES ('bob', ?1)",
                params![now()],
            )
            .unwrap();
        let err = db
            .conn()
            .execute(
                "INSERT INTO users (name, created_at) VALUES ('bob', ?1)",
                params![now()],
            )
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
