//! sqlite-adapter — SQLite implementation of the storage ports.
//!
//! Purpose
//! - Durable backend for the link store: implements `LinkStore` and
//!   `AnalyticsStore` from the `domain` crate.
//! - Links, clicks and unique visitor IPs live in three tables; clicks and
//!   unique IPs reference their link with `ON DELETE CASCADE`.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability.
//! - Timestamps are stored as RFC 3339 UTC strings with nanosecond precision;
//!   second precision is accepted when reading.
//! - Multi-statement writes (`upsert`, `replace_expired`, `record_click`) run
//!   in a single transaction, so a failure leaves the previous state in place.
//!   `replace_expired` takes the write lock up front (`BEGIN IMMEDIATE`), so
//!   the expiry check and the overwrite cannot interleave with another writer.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use domain::{AnalyticsStore, Click, Code, Link, LinkOverview, LinkStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

/// SQLite-backed link store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path and ensure schema.
    /// Missing parent directories are created.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(map_sqerr)?;
            }
        }
        let conn = Connection::open(path).map_err(map_sqerr)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(map_sqerr)?;
        init_schema(&conn)?;
        debug!(path = %path.display(), "sqlite store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("mutex poisoned".into()))
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS links (
            code TEXT PRIMARY KEY,
            original_url TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT
        );
        CREATE TABLE IF NOT EXISTS clicks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            ip TEXT,
            country TEXT,
            user_agent TEXT,
            FOREIGN KEY(code) REFERENCES links(code) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_clicks_code ON clicks(code);
        CREATE TABLE IF NOT EXISTS unique_ips (
            code TEXT NOT NULL,
            ip TEXT NOT NULL,
            PRIMARY KEY (code, ip),
            FOREIGN KEY(code) REFERENCES links(code) ON DELETE CASCADE
        );
        "#,
    )
    .map_err(map_sqerr)
}

fn map_sqerr<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(format!("sqlite error: {e}"))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation)
}

fn format_time(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(s: &str) -> Result<SystemTime, StoreError> {
    if s.is_empty() {
        return Err(StoreError::Backend("empty timestamp in db".into()));
    }
    let dt = DateTime::parse_from_rfc3339(s)
        .map_err(|e| StoreError::Backend(format!("bad timestamp in db '{s}': {e}")))?;
    Ok(dt.with_timezone(&Utc).into())
}

fn parse_code(s: String) -> Result<Code, StoreError> {
    Code::new(s).map_err(|e| StoreError::Backend(format!("bad code in db: {e}")))
}

type LinkRow = (String, String, String, Option<String>);

fn load_link(conn: &Connection, code: &Code) -> Result<Option<Link>, StoreError> {
    let row: Option<LinkRow> = conn
        .query_row(
            "SELECT code, original_url, created_at, expires_at FROM links WHERE code = ?1",
            params![code.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()
        .map_err(map_sqerr)?;
    let Some((code_str, original_url, created_at, expires_at)) = row else {
        return Ok(None);
    };

    let clicks = load_clicks(conn, code)?;
    let unique_ips = load_unique_ips(conn, code)?;
    Ok(Some(Link::restore(
        parse_code(code_str)?,
        original_url,
        parse_time(&created_at)?,
        expires_at.as_deref().map(parse_time).transpose()?,
        clicks,
        unique_ips,
    )))
}

fn load_clicks(conn: &Connection, code: &Code) -> Result<Vec<Click>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT timestamp, ip, country, user_agent FROM clicks WHERE code = ?1 ORDER BY id",
        )
        .map_err(map_sqerr)?;
    let mut rows = stmt.query(params![code.as_str()]).map_err(map_sqerr)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(map_sqerr)? {
        let ts: String = row.get(0).map_err(map_sqerr)?;
        let ip: Option<String> = row.get(1).map_err(map_sqerr)?;
        let country: Option<String> = row.get(2).map_err(map_sqerr)?;
        let user_agent: Option<String> = row.get(3).map_err(map_sqerr)?;
        out.push(Click {
            timestamp: parse_time(&ts)?,
            ip: ip.unwrap_or_default(),
            country: country.unwrap_or_default(),
            user_agent: user_agent.unwrap_or_default(),
        });
    }
    Ok(out)
}

fn load_unique_ips(conn: &Connection, code: &Code) -> Result<BTreeSet<String>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT ip FROM unique_ips WHERE code = ?1")
        .map_err(map_sqerr)?;
    let mut rows = stmt.query(params![code.as_str()]).map_err(map_sqerr)?;
    let mut out = BTreeSet::new();
    while let Some(row) = rows.next().map_err(map_sqerr)? {
        let ip: String = row.get(0).map_err(map_sqerr)?;
        if !ip.is_empty() {
            out.insert(ip);
        }
    }
    Ok(out)
}

/// Store `link` with no click history, clearing whatever the code held.
fn write_fresh(conn: &Connection, link: &Link) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM clicks WHERE code = ?1",
        params![link.code.as_str()],
    )
    .map_err(map_sqerr)?;
    conn.execute(
        "DELETE FROM unique_ips WHERE code = ?1",
        params![link.code.as_str()],
    )
    .map_err(map_sqerr)?;
    conn.execute(
        "INSERT INTO links(code, original_url, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(code) DO UPDATE SET
           original_url = excluded.original_url,
           created_at = excluded.created_at,
           expires_at = excluded.expires_at",
        params![
            link.code.as_str(),
            link.original_url,
            format_time(link.created_at),
            link.expires_at.map(format_time),
        ],
    )
    .map_err(map_sqerr)?;
    Ok(())
}

impl LinkStore for SqliteStore {
    fn save(&self, link: Link) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let res = conn.execute(
            "INSERT INTO links(code, original_url, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                link.code.as_str(),
                link.original_url,
                format_time(link.created_at),
                link.expires_at.map(format_time),
            ],
        );
        match res {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::CodeExists),
            Err(e) => Err(map_sqerr(e)),
        }
    }

    fn get(&self, code: &Code) -> Result<Option<Link>, StoreError> {
        let conn = self.lock()?;
        load_link(&conn, code)
    }
}

impl AnalyticsStore for SqliteStore {
    fn upsert(&self, link: Link) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        // Dropping the transaction without commit rolls back.
        let tx = conn.transaction().map_err(map_sqerr)?;
        write_fresh(&tx, &link)?;
        tx.commit().map_err(map_sqerr)
    }

    fn replace_expired(&self, link: Link, now: SystemTime) -> Result<Option<usize>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_sqerr)?;
        let expires_at: Option<Option<String>> = tx
            .query_row(
                "SELECT expires_at FROM links WHERE code = ?1",
                params![link.code.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sqerr)?;
        // Absent, or stored without an expiry
        let Some(Some(expires_at)) = expires_at else {
            return Ok(None);
        };
        if now <= parse_time(&expires_at)? {
            return Ok(None);
        }

        let dropped: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM clicks WHERE code = ?1",
                params![link.code.as_str()],
                |row| row.get(0),
            )
            .map_err(map_sqerr)?;
        write_fresh(&tx, &link)?;
        tx.commit().map_err(map_sqerr)?;
        Ok(Some(dropped as usize))
    }

    fn list(&self) -> Result<Vec<LinkOverview>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT l.code, l.original_url, l.created_at, l.expires_at,
                        (SELECT COUNT(*) FROM clicks c WHERE c.code = l.code),
                        (SELECT COUNT(*) FROM unique_ips u WHERE u.code = l.code)
                 FROM links l ORDER BY l.created_at DESC",
            )
            .map_err(map_sqerr)?;
        let mut rows = stmt.query([]).map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            let code: String = row.get(0).map_err(map_sqerr)?;
            let original_url: String = row.get(1).map_err(map_sqerr)?;
            let created_at: String = row.get(2).map_err(map_sqerr)?;
            let expires_at: Option<String> = row.get(3).map_err(map_sqerr)?;
            let total_clicks: i64 = row.get(4).map_err(map_sqerr)?;
            let unique_visitors: i64 = row.get(5).map_err(map_sqerr)?;
            out.push(LinkOverview {
                code: parse_code(code)?,
                original_url,
                created_at: parse_time(&created_at)?,
                expires_at: expires_at.as_deref().map(parse_time).transpose()?,
                total_clicks: total_clicks as usize,
                unique_visitors: unique_visitors as usize,
            });
        }
        Ok(out)
    }

    fn record_click(&self, code: &Code, click: Click) -> Result<Link, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(map_sqerr)?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM links WHERE code = ?1",
                params![code.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map_err(map_sqerr)?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        tx.execute(
            "INSERT INTO clicks(code, timestamp, ip, country, user_agent) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                code.as_str(),
                format_time(click.timestamp),
                click.ip,
                click.country,
                click.user_agent,
            ],
        )
        .map_err(map_sqerr)?;
        if !click.ip.is_empty() {
            tx.execute(
                "INSERT OR IGNORE INTO unique_ips(code, ip) VALUES (?1, ?2)",
                params![code.as_str(), click.ip],
            )
            .map_err(map_sqerr)?;
        }
        tx.commit().map_err(map_sqerr)?;

        load_link(&conn, code)?.ok_or(StoreError::NotFound)
    }
}
