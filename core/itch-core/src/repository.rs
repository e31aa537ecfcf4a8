//! Read-only access to the itch client's butler database.
//!
//! Every call opens a fresh connection, runs one query and drops the
//! connection. Nothing is cached here; policy lives in the classifier and
//! resolver.

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ItchError, Result};
use crate::types::{CurrentUser, RawInstallationRow, RawOwnershipRow};

const BUSY_TIMEOUT_MS: i64 = 5000;

// A game is owned when it has a download key, or when it sits in a
// collection and is free. DISTINCT collapses rows multiplied by the joins.
const OWNERSHIP_SQL: &str = "\
    SELECT DISTINCT games.id, games.title, games.min_price, games.can_be_bought \
    FROM games \
    LEFT JOIN download_keys dk ON games.id = dk.game_id \
    LEFT JOIN collection_games cg ON games.id = cg.game_id \
    WHERE (cg.collection_id IS NOT NULL AND games.min_price = 0) \
       OR (dk.id IS NOT NULL) \
    ORDER BY games.id";

const INSTALLATIONS_SQL: &str = "SELECT game_id, verdict FROM caves ORDER BY game_id";

const INSTALLATION_BY_GAME_SQL: &str = "SELECT game_id, verdict FROM caves WHERE game_id = ?1 LIMIT 1";

const CURRENT_USER_SQL: &str = "\
    SELECT u.id, u.username \
    FROM users u \
    INNER JOIN profiles p ON u.id = p.user_id \
    ORDER BY u.id \
    LIMIT 1";

/// Data-access contract for the ownership and installation pipelines.
pub trait CatalogRepository: Send + Sync {
    fn fetch_ownership_rows(&self) -> Result<Vec<RawOwnershipRow>>;

    fn fetch_installation_rows(&self) -> Result<Vec<RawInstallationRow>>;

    /// Single-title lookup used when launching a game the installed cache
    /// has not seen yet.
    fn fetch_installation_row(&self, game_id: &str) -> Result<Option<RawInstallationRow>>;

    fn fetch_current_user(&self) -> Result<CurrentUser>;
}

pub struct ButlerDb {
    path: PathBuf,
}

impl ButlerDb {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_connection<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        debug!(path = %self.path.display(), "Opening butler database");
        let conn = self.open()?;
        let result = op(&conn);
        drop(conn);
        debug!(path = %self.path.display(), "Closed butler database");
        result
    }

    fn open(&self) -> Result<Connection> {
        if !self.path.exists() {
            return Err(self.unavailable("file does not exist"));
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| self.unavailable(format!("failed to open: {}", err)))?;

        // The itch client holds its own connection; wait for its locks.
        conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
            .map_err(|err| self.unavailable(format!("failed to set busy_timeout: {}", err)))?;

        Ok(conn)
    }

    fn unavailable(&self, details: impl Into<String>) -> ItchError {
        ItchError::DataStoreUnavailable {
            path: self.path.clone(),
            details: details.into(),
        }
    }
}

impl CatalogRepository for ButlerDb {
    fn fetch_ownership_rows(&self) -> Result<Vec<RawOwnershipRow>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(OWNERSHIP_SQL)
                .map_err(|err| ItchError::query("prepare ownership query", err))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(RawOwnershipRow {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        min_price: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                        can_be_bought: row.get::<_, Option<i64>>(3)?.unwrap_or(0) == 1,
                    })
                })
                .map_err(|err| ItchError::query("read ownership rows", err))?;

            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|err| ItchError::query("decode ownership row", err))
        })
    }

    fn fetch_installation_rows(&self) -> Result<Vec<RawInstallationRow>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(INSTALLATIONS_SQL)
                .map_err(|err| ItchError::query("prepare caves query", err))?;
            let rows = stmt
                .query_map([], installation_row)
                .map_err(|err| ItchError::query("read caves rows", err))?;

            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|err| ItchError::query("decode caves row", err))
        })
    }

    fn fetch_installation_row(&self, game_id: &str) -> Result<Option<RawInstallationRow>> {
        let Ok(numeric_id) = game_id.parse::<i64>() else {
            return Ok(None);
        };

        self.with_connection(|conn| {
            conn.query_row(INSTALLATION_BY_GAME_SQL, params![numeric_id], installation_row)
                .optional()
                .map_err(|err| ItchError::query("query cave for game", err))
        })
    }

    fn fetch_current_user(&self) -> Result<CurrentUser> {
        self.with_connection(|conn| {
            conn.query_row(CURRENT_USER_SQL, [], |row| {
                Ok(CurrentUser {
                    id: row.get(0)?,
                    username: row.get(1)?,
                })
            })
            .optional()
            .map_err(|err| ItchError::query("query current user", err))?
            .ok_or(ItchError::UserNotFound)
        })
    }
}

fn installation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawInstallationRow> {
    Ok(RawInstallationRow {
        game_id: row.get(0)?,
        verdict_json: row.get(1)?,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use rusqlite::{params, Connection};
    use std::path::Path;

    /// Minimal subset of the butler schema touched by the bridge.
    pub fn create_butler_db(path: &Path) -> Connection {
        let conn = Connection::open(path).expect("open butler db");
        conn.execute_batch(
            "CREATE TABLE games (
                id INTEGER PRIMARY KEY,
                url TEXT,
                title TEXT,
                min_price INTEGER,
                can_be_bought INTEGER
             );
             CREATE TABLE download_keys (id INTEGER PRIMARY KEY, game_id INTEGER);
             CREATE TABLE collection_games (collection_id INTEGER, game_id INTEGER);
             CREATE TABLE caves (id TEXT PRIMARY KEY, game_id INTEGER, verdict TEXT);
             CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT);
             CREATE TABLE profiles (id INTEGER PRIMARY KEY, user_id INTEGER);",
        )
        .expect("create schema");
        conn
    }

    pub fn insert_game(conn: &Connection, id: i64, title: Option<&str>, min_price: i64, buyable: bool) {
        conn.execute(
            "INSERT INTO games (id, url, title, min_price, can_be_bought) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, format!("https://example.itch.io/{}", id), title, min_price, buyable as i64],
        )
        .expect("insert game");
    }

    pub fn insert_download_key(conn: &Connection, id: i64, game_id: i64) {
        conn.execute(
            "INSERT INTO download_keys (id, game_id) VALUES (?1, ?2)",
            params![id, game_id],
        )
        .expect("insert download key");
    }

    pub fn insert_collection_game(conn: &Connection, collection_id: i64, game_id: i64) {
        conn.execute(
            "INSERT INTO collection_games (collection_id, game_id) VALUES (?1, ?2)",
            params![collection_id, game_id],
        )
        .expect("insert collection game");
    }

    pub fn insert_cave(conn: &Connection, id: &str, game_id: i64, verdict: Option<&str>) {
        conn.execute(
            "INSERT INTO caves (id, game_id, verdict) VALUES (?1, ?2, ?3)",
            params![id, game_id, verdict],
        )
        .expect("insert cave");
    }

    pub fn insert_user(conn: &Connection, id: i64, username: &str) {
        conn.execute(
            "INSERT INTO users (id, username) VALUES (?1, ?2)",
            params![id, username],
        )
        .expect("insert user");
        conn.execute(
            "INSERT INTO profiles (id, user_id) VALUES (?1, ?2)",
            params![id * 10, id],
        )
        .expect("insert profile");
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn fixture() -> (tempfile::TempDir, ButlerDb, Connection) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("butler.db");
        let conn = create_butler_db(&path);
        (temp_dir, ButlerDb::new(path), conn)
    }

    #[test]
    fn missing_database_is_unavailable() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = ButlerDb::new(temp_dir.path().join("nope.db"));

        let err = db.fetch_ownership_rows().unwrap_err();
        assert!(matches!(err, ItchError::DataStoreUnavailable { .. }));
        // Opening read-only must not create the file.
        assert!(!temp_dir.path().join("nope.db").exists());
    }

    #[test]
    fn ownership_includes_download_keys_and_free_collection_games() {
        let (_dir, db, conn) = fixture();
        insert_game(&conn, 1, Some("Bought"), 500, true);
        insert_download_key(&conn, 100, 1);
        insert_game(&conn, 2, Some("Free in collection"), 0, false);
        insert_collection_game(&conn, 9, 2);
        insert_game(&conn, 3, Some("Paid in collection"), 300, true);
        insert_collection_game(&conn, 9, 3);
        insert_game(&conn, 4, Some("Unrelated"), 0, false);

        let rows = db.fetch_ownership_rows().expect("rows");
        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(rows[0].min_price, 500);
        assert!(rows[0].can_be_bought);
        assert!(!rows[1].can_be_bought);
    }

    #[test]
    fn ownership_returns_game_once_when_both_conditions_hold() {
        let (_dir, db, conn) = fixture();
        insert_game(&conn, 7, Some("Both"), 0, true);
        insert_download_key(&conn, 1, 7);
        insert_download_key(&conn, 2, 7);
        insert_collection_game(&conn, 1, 7);
        insert_collection_game(&conn, 2, 7);

        let rows = db.fetch_ownership_rows().expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 7);
    }

    #[test]
    fn ownership_keeps_null_titles_for_the_classifier() {
        let (_dir, db, conn) = fixture();
        insert_game(&conn, 5, None, 0, false);
        insert_download_key(&conn, 1, 5);

        let rows = db.fetch_ownership_rows().expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, None);
    }

    #[test]
    fn installation_rows_and_single_lookup() {
        let (_dir, db, conn) = fixture();
        insert_cave(&conn, "cave-a", 11, Some(r#"{"basePath":"/g","candidates":[]}"#));
        insert_cave(&conn, "cave-b", 12, None);

        let rows = db.fetch_installation_rows().expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].verdict_json, None);

        let single = db.fetch_installation_row("11").expect("lookup");
        assert_eq!(single.map(|row| row.game_id), Some(11));
        assert_eq!(db.fetch_installation_row("99").expect("lookup"), None);
        assert_eq!(db.fetch_installation_row("abc").expect("lookup"), None);
    }

    #[test]
    fn current_user_is_lowest_id_with_profile() {
        let (_dir, db, conn) = fixture();
        insert_user(&conn, 42, "second");
        insert_user(&conn, 7, "first");
        conn.execute("INSERT INTO users (id, username) VALUES (1, 'no-profile')", [])
            .expect("insert orphan user");

        let user = db.fetch_current_user().expect("user");
        assert_eq!(
            user,
            CurrentUser {
                id: 7,
                username: "first".to_string()
            }
        );
    }

    #[test]
    fn current_user_missing_is_an_error() {
        let (_dir, db, _conn) = fixture();
        assert!(matches!(
            db.fetch_current_user(),
            Err(ItchError::UserNotFound)
        ));
    }
}
