//! SQLite-backed catalog, backlog and usage store.
//!
//! One connection, one writer. The publishing loop is the only component
//! that flips `used`; if several runners ever share the file, `mark_used`
//! is a plain idempotent UPDATE so a second writer cannot corrupt state.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};
use crate::types::{CatalogItem, CommandType, ContentToken, MetadataField, Request, RequestKind};

pub(crate) struct RequestDb {
    conn: Connection,
}

impl RequestDb {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS movies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                og_title TEXT,
                year INTEGER,
                director TEXT,
                category TEXT,
                path TEXT NOT NULL,
                subtitle TEXT
            );
            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                season INTEGER NOT NULL,
                episode INTEGER NOT NULL,
                year INTEGER,
                category TEXT,
                path TEXT NOT NULL,
                subtitle TEXT
            );
            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                user TEXT NOT NULL,
                comment TEXT NOT NULL,
                type TEXT NOT NULL,
                movie TEXT NOT NULL,
                content TEXT NOT NULL,
                parallel TEXT,
                episode INTEGER NOT NULL DEFAULT 0,
                verified INTEGER NOT NULL DEFAULT 0,
                used INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                added_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS users (
                name TEXT PRIMARY KEY,
                blocked INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS usage_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL,
                is_episode INTEGER NOT NULL,
                user TEXT NOT NULL,
                posted_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    // ── Catalog ──────────────────────────────────────────────────────────

    pub(crate) fn list_movies(&self) -> Result<Vec<CatalogItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, og_title, year, director, category, path, subtitle
             FROM movies ORDER BY id",
        )?;
        let rows = stmt.query_map([], movie_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub(crate) fn list_episodes(&self) -> Result<Vec<CatalogItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, season, episode, year, category, path, subtitle
             FROM episodes ORDER BY id",
        )?;
        let rows = stmt.query_map([], episode_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Metadata-command lookup over the movie catalog, e.g. every item from
    /// 1977 or by a given director. Candidates come back in catalog order;
    /// the caller skips resting ones.
    pub(crate) fn discover(&self, field: MetadataField, value: &str) -> Result<Vec<CatalogItem>> {
        let value = value.trim();
        let (sql, param): (&str, String) = match field {
            MetadataField::Year => {
                if value.parse::<i32>().is_err() {
                    return Ok(Vec::new());
                }
                (
                    "SELECT id, title, og_title, year, director, category, path, subtitle
                     FROM movies WHERE year = ? ORDER BY id",
                    value.to_string(),
                )
            }
            MetadataField::Director => (
                "SELECT id, title, og_title, year, director, category, path, subtitle
                 FROM movies WHERE director LIKE '%' || ? || '%' ORDER BY id",
                value.to_string(),
            ),
            MetadataField::Category => (
                "SELECT id, title, og_title, year, director, category, path, subtitle
                 FROM movies WHERE category LIKE '%' || ? || '%' ORDER BY id",
                value.to_string(),
            ),
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![param], movie_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ── Backlog ──────────────────────────────────────────────────────────

    /// Unused rows of one backlog, oldest first. Malformed rows are logged
    /// and skipped rather than poisoning the whole run.
    pub(crate) fn get_requests(&self, kind: RequestKind, priority: bool) -> Result<Vec<Request>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user, comment, type, movie, content, parallel, episode, verified,
                    used, priority
             FROM requests
             WHERE used = 0 AND episode = ? AND priority = ?
             ORDER BY added_at, id",
        )?;
        let episode_flag = kind == RequestKind::Episodes;
        let raw_rows = stmt.query_map(params![episode_flag, priority], raw_request_from_row)?;

        let mut requests = Vec::new();
        for raw in raw_rows {
            let raw = raw?;
            match raw.into_request() {
                Ok(request) => requests.push(request),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed request row");
                }
            }
        }
        Ok(requests)
    }

    pub(crate) fn mark_used(&self, request_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE requests SET used = 1 WHERE id = ?",
            params![request_id],
        )?;
        Ok(())
    }

    // ── Users ────────────────────────────────────────────────────────────

    pub(crate) fn is_blocked(&self, user: &str) -> Result<bool> {
        let blocked: Option<bool> = self
            .conn
            .query_row(
                "SELECT blocked FROM users WHERE name = ?",
                params![user],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blocked.unwrap_or(false))
    }

    pub(crate) fn block_user(&self, user: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO users (name, blocked) VALUES (?, 1)
             ON CONFLICT(name) DO UPDATE SET blocked = 1",
            params![user],
        )?;
        Ok(())
    }

    // ── Usage / resting policy ───────────────────────────────────────────

    pub(crate) fn record_usage(&self, item: &CatalogItem, user: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO usage_log (item_id, is_episode, user, posted_at) VALUES (?, ?, ?, ?)",
            params![item.id, item.is_episode(), user, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Resting policy: was this item published within the window?
    pub(crate) fn recently_served(&self, item: &CatalogItem, hours: i64) -> Result<bool> {
        let cutoff = Utc::now().timestamp() - hours * 3600;
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM usage_log
             WHERE item_id = ? AND is_episode = ? AND posted_at > ?",
            params![item.id, item.is_episode(), cutoff],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ── Ingestion (used by the comment scanner and by tests) ─────────────

    pub(crate) fn add_movie(&self, item: &CatalogItem) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO movies (title, og_title, year, director, category, path, subtitle)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                item.title,
                item.og_title,
                item.year,
                item.director,
                item.category,
                item.path.to_string_lossy().to_string(),
                item.subtitle.as_ref().map(|p| p.to_string_lossy().to_string()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn add_episode(&self, item: &CatalogItem) -> Result<i64> {
        let (season, episode) = match (item.season, item.episode) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                return Err(Error::NotFound(
                    "episode rows need season and episode numbers".to_string(),
                ));
            }
        };
        self.conn.execute(
            "INSERT INTO episodes (title, season, episode, year, category, path, subtitle)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                item.title,
                season,
                episode,
                item.year,
                item.category,
                item.path.to_string_lossy().to_string(),
                item.subtitle.as_ref().map(|p| p.to_string_lossy().to_string()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn insert_request(&self, request: &Request, raw_content: &[String]) -> Result<()> {
        self.conn.execute(
            "INSERT INTO requests
                 (id, user, comment, type, movie, content, parallel, episode, verified,
                  used, priority, added_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                request.id,
                request.user,
                request.comment,
                request.command.as_str(),
                request.movie,
                serde_json::to_string(raw_content)?,
                serde_json::to_string(&request.parallel)?,
                request.is_episode,
                request.verified,
                request.used,
                request.priority,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }
}

// ── Row mapping ──────────────────────────────────────────────────────────

fn movie_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CatalogItem> {
    Ok(CatalogItem {
        id: row.get(0)?,
        title: row.get(1)?,
        og_title: row.get(2)?,
        year: row.get(3)?,
        director: row.get(4)?,
        category: row.get(5)?,
        path: PathBuf::from(row.get::<_, String>(6)?),
        subtitle: row.get::<_, Option<String>>(7)?.map(PathBuf::from),
        season: None,
        episode: None,
    })
}

fn episode_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CatalogItem> {
    Ok(CatalogItem {
        id: row.get(0)?,
        title: row.get(1)?,
        og_title: None,
        year: row.get(4)?,
        director: None,
        category: row.get(5)?,
        path: PathBuf::from(row.get::<_, String>(6)?),
        subtitle: row.get::<_, Option<String>>(7)?.map(PathBuf::from),
        season: Some(row.get(2)?),
        episode: Some(row.get(3)?),
    })
}

/// Row image before token/command parsing. Kept separate so a bad row turns
/// into one skipped request instead of a failed query.
struct RawRequest {
    id: String,
    user: String,
    comment: String,
    command: String,
    movie: String,
    content: String,
    parallel: Option<String>,
    is_episode: bool,
    verified: bool,
    used: bool,
    priority: bool,
}

fn raw_request_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRequest> {
    Ok(RawRequest {
        id: row.get(0)?,
        user: row.get(1)?,
        comment: row.get(2)?,
        command: row.get(3)?,
        movie: row.get(4)?,
        content: row.get(5)?,
        parallel: row.get(6)?,
        is_episode: row.get(7)?,
        verified: row.get(8)?,
        used: row.get(9)?,
        priority: row.get(10)?,
    })
}

impl RawRequest {
    fn into_request(self) -> Result<Request> {
        let raw_tokens: Vec<String> = serde_json::from_str(&self.content)?;
        let content: Vec<ContentToken> =
            raw_tokens.iter().map(|t| ContentToken::parse(t)).collect();
        let parallel: Vec<String> = match self.parallel.as_deref() {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)?,
            _ => Vec::new(),
        };
        let command = CommandType::parse(&self.command, &content)
            .ok_or_else(|| Error::NotFound(format!("unknown command {}", self.command)))?;
        Ok(Request {
            id: self.id,
            user: self.user,
            comment: self.comment,
            command,
            content,
            movie: self.movie,
            is_episode: self.is_episode,
            parallel,
            verified: self.verified,
            used: self.used,
            priority: self.priority,
        })
    }
}
