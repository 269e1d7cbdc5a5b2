//! SQLite-backed Store implementation.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

use crate::request::{
    Control, DestinationClass, MediaScanned, NetworkTypeMask, Request, RequestFlags, RequestId,
    Status, Visibility,
};

use super::{Change, NewRequest, Patch};

/// Current wall-clock time in milliseconds, as `last_modified`/`created_at` expect.
pub fn unix_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Typed view over the persistent `downloads` table, with a broadcast
/// change stream observers can subscribe to independently.
pub struct Store {
    pool: Pool<Sqlite>,
    changes: broadcast::Sender<Change>,
}

impl Store {
    /// Opens (creating if absent) the database at the default XDG state path
    /// `~/.local/state/ddm/downloads.db`.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("ddm")?;
        let path = xdg_dirs.place_state_file("downloads.db")?;
        Self::open(&path).await
    }

    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .with_context(|| format!("failed to open store database at {}", path.display()))?;
        let store = Store {
            pool,
            changes: broadcast::channel(256).0,
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                uid INTEGER NOT NULL,
                source_uri TEXT NOT NULL,
                hint_name TEXT,
                referer TEXT,
                cookies TEXT,
                user_agent TEXT,
                destination_class TEXT NOT NULL,
                file_path TEXT,
                mime_type TEXT,
                total_bytes INTEGER NOT NULL DEFAULT -1,
                current_bytes INTEGER NOT NULL DEFAULT 0,
                etag TEXT,
                no_integrity INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                control TEXT NOT NULL,
                visibility TEXT NOT NULL,
                allowed_network_types INTEGER NOT NULL,
                allow_roaming INTEGER NOT NULL,
                allow_metered INTEGER NOT NULL,
                bypass_recommended_size_limit INTEGER NOT NULL,
                flags INTEGER NOT NULL,
                num_failed INTEGER NOT NULL DEFAULT 0,
                retry_after_ms INTEGER NOT NULL DEFAULT 0,
                last_modified INTEGER NOT NULL,
                redirect_count INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0,
                media_scanned TEXT NOT NULL,
                media_store_uri TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS headers (
                request_id INTEGER NOT NULL REFERENCES downloads(id),
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (request_id, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Subscribe to the change stream (§4.1 `observe()`). Used by the
    /// Scheduler and the Notifier independently.
    pub fn observe(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    fn publish(&self, change: Change) {
        // No subscribers is not an error: the engine may run headless.
        let _ = self.changes.send(change);
    }

    /// Insert a new Pending request. Returns its id.
    pub async fn add(&self, req: &NewRequest) -> Result<RequestId> {
        let now = unix_timestamp_ms();
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            r#"
            INSERT INTO downloads (
                owner, uid, source_uri, hint_name, referer, cookies, user_agent,
                destination_class, file_path, mime_type, total_bytes, current_bytes,
                etag, no_integrity, status, control, visibility,
                allowed_network_types, allow_roaming, allow_metered,
                bypass_recommended_size_limit, flags, num_failed, retry_after_ms,
                last_modified, redirect_count, deleted, media_scanned, media_store_uri,
                created_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, -1, 0,
                NULL, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17,
                ?18, ?19, 0, 0,
                ?20, 0, 0, ?21, NULL,
                ?22
            )
            "#,
        )
        .bind(&req.owner)
        .bind(req.uid)
        .bind(&req.source_uri)
        .bind(&req.hint_name)
        .bind(&req.referer)
        .bind(&req.cookies)
        .bind(&req.user_agent)
        .bind(req.destination_class.as_str())
        .bind(&req.file_path)
        .bind(&req.mime_type)
        .bind(req.no_integrity as i64)
        .bind(Status::Pending.as_str())
        .bind(Control::Run.as_str())
        .bind(req.visibility.as_str())
        .bind(req.allowed_network_types.bits() as i64)
        .bind(req.allow_roaming as i64)
        .bind(req.allow_metered as i64)
        .bind(req.bypass_recommended_size_limit as i64)
        .bind(req.flags.bits() as i64)
        .bind(now)
        .bind(MediaScanned::NotScanned.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (pos, (name, value)) in req.headers.iter().enumerate() {
            sqlx::query(
                "INSERT INTO headers (request_id, position, name, value) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(id)
            .bind(pos as i64)
            .bind(name)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.publish(Change::Added(id));
        Ok(id)
    }

    async fn load_headers(&self, id: RequestId) -> Result<std::collections::HashMap<String, String>> {
        let rows = sqlx::query(
            "SELECT name, value FROM headers WHERE request_id = ?1 ORDER BY position ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("name"), r.get::<String, _>("value")))
            .collect())
    }

    fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Request {
        Request {
            id: row.get("id"),
            owner: row.get("owner"),
            uid: row.get("uid"),
            source_uri: row.get("source_uri"),
            hint_name: row.get("hint_name"),
            referer: row.get("referer"),
            cookies: row.get("cookies"),
            user_agent: row.get("user_agent"),
            destination_class: DestinationClass::from_str(&row.get::<String, _>("destination_class")),
            file_path: row.get("file_path"),
            mime_type: row.get("mime_type"),
            total_bytes: row.get("total_bytes"),
            current_bytes: row.get("current_bytes"),
            etag: row.get("etag"),
            no_integrity: row.get::<i64, _>("no_integrity") != 0,
            status: Status::from_str(&row.get::<String, _>("status")),
            control: Control::from_str(&row.get::<String, _>("control")),
            visibility: Visibility::from_str(&row.get::<String, _>("visibility")),
            allowed_network_types: NetworkTypeMask::from_bits_truncate(
                row.get::<i64, _>("allowed_network_types") as u8,
            ),
            allow_roaming: row.get::<i64, _>("allow_roaming") != 0,
            allow_metered: row.get::<i64, _>("allow_metered") != 0,
            bypass_recommended_size_limit: row.get::<i64, _>("bypass_recommended_size_limit") != 0,
            flags: RequestFlags::from_bits_truncate(row.get::<i64, _>("flags") as u8),
            num_failed: row.get::<i64, _>("num_failed") as u32,
            retry_after_ms: row.get("retry_after_ms"),
            last_modified: row.get("last_modified"),
            redirect_count: row.get::<i64, _>("redirect_count") as u32,
            deleted: row.get::<i64, _>("deleted") != 0,
            media_scanned: MediaScanned::from_str(&row.get::<String, _>("media_scanned")),
            media_store_uri: row.get("media_store_uri"),
            headers: std::collections::HashMap::new(),
        }
    }

    /// All non-deleted rows, ordered by id (§4.1).
    pub async fn list_active(&self) -> Result<Vec<Request>> {
        let rows = sqlx::query("SELECT * FROM downloads WHERE deleted = 0 ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut req = Self::row_to_request(row);
            req.headers = self.load_headers(req.id).await?;
            out.push(req);
        }
        Ok(out)
    }

    pub async fn get(&self, id: RequestId) -> Result<Option<Request>> {
        let row = sqlx::query("SELECT * FROM downloads WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut req = Self::row_to_request(&row);
        req.headers = self.load_headers(id).await?;
        Ok(Some(req))
    }

    /// Atomic per-row field update; notifies observers on success
    /// (read-your-writes: a subsequent `list_active`/`get` sees the new value).
    pub async fn update(&self, id: RequestId, patch: &Patch) -> Result<()> {
        let Some(mut req) = self.get(id).await? else {
            anyhow::bail!("update: no such request {id}");
        };

        if let Some(v) = patch.status {
            req.status = v;
        }
        if let Some(v) = patch.control {
            req.control = v;
        }
        if let Some(v) = patch.current_bytes {
            req.current_bytes = v;
        }
        if let Some(v) = patch.total_bytes {
            req.total_bytes = v;
        }
        if let Some(v) = patch.etag.clone() {
            req.etag = v;
        }
        if let Some(v) = patch.file_path.clone() {
            req.file_path = v;
        }
        if let Some(v) = patch.mime_type.clone() {
            req.mime_type = v;
        }
        if let Some(v) = patch.source_uri.clone() {
            req.source_uri = v;
        }
        if let Some(v) = patch.num_failed {
            req.num_failed = v;
        }
        if let Some(v) = patch.retry_after_ms {
            req.retry_after_ms = v;
        }
        if let Some(v) = patch.last_modified {
            req.last_modified = v;
        } else {
            req.last_modified = unix_timestamp_ms();
        }
        if let Some(v) = patch.redirect_count {
            req.redirect_count = v;
        }
        if let Some(v) = patch.deleted {
            req.deleted = v;
        }
        if let Some(v) = patch.media_scanned {
            req.media_scanned = v;
        }
        if let Some(v) = patch.media_store_uri.clone() {
            req.media_store_uri = v;
        }

        sqlx::query(
            r#"
            UPDATE downloads SET
                status = ?1, control = ?2, current_bytes = ?3, total_bytes = ?4,
                etag = ?5, file_path = ?6, mime_type = ?7, source_uri = ?8,
                num_failed = ?9, retry_after_ms = ?10, last_modified = ?11,
                redirect_count = ?12, deleted = ?13, media_scanned = ?14,
                media_store_uri = ?15
            WHERE id = ?16
            "#,
        )
        .bind(req.status.as_str())
        .bind(req.control.as_str())
        .bind(req.current_bytes)
        .bind(req.total_bytes)
        .bind(&req.etag)
        .bind(&req.file_path)
        .bind(&req.mime_type)
        .bind(&req.source_uri)
        .bind(req.num_failed as i64)
        .bind(req.retry_after_ms)
        .bind(req.last_modified)
        .bind(req.redirect_count as i64)
        .bind(req.deleted as i64)
        .bind(req.media_scanned.as_str())
        .bind(&req.media_store_uri)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.publish(Change::Updated(id));
        Ok(())
    }

    /// Physical removal, cascading header rows (§4.1).
    pub async fn delete(&self, id: RequestId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM headers WHERE request_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM downloads WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.publish(Change::Deleted(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests;
