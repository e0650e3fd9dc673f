use log::{debug, warn};
use mos_lib::{mime_from_basename, BucketName, EntityId, FilePath, MosError, MosResult};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::fts::Bm25Index;

pub const CATALOG_DB_FILE: &str = "catalog.db";
pub const DEFAULT_MAX_DESCRIPTION_SIZE: usize = 100 * 1024;
pub const DEFAULT_MAX_METADATA_JSON_SIZE: usize = 100 * 1024;

pub(crate) fn unix_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Pre-tokenization hook applied to stored descriptions and search queries,
/// so non-whitespace-tokenized languages can be segmented by the caller.
pub type FtsStringFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// The metadata row projection returned by `read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub entity_id: EntityId,
    pub checksum: String,
    pub mime_type: String,
    pub file_size: u64,
    pub last_modified: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub file_path: FilePath,
    pub description: Option<String>,
    pub search_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub is_file: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_file: bool,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderByName {
    #[default]
    Asc,
    Desc,
}

impl OrderByName {
    fn as_sql(&self) -> &'static str {
        match self {
            OrderByName::Asc => "ASC",
            OrderByName::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub recursive: bool,
    pub score_threshold: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub offset: usize,
    pub order_by_name: OrderByName,
}

/// Tri-state field update: leave the column alone, clear it to NULL, or set
/// a new value.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Keep,
    Clear,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }
}

/// Partial update for one catalog row. An all-default value only verifies
/// that the row exists. `old_entity_id` turns the UPDATE into an optimistic
/// commit: a stale id matches zero rows, surfaced as `FileNotFound`.
#[derive(Debug, Clone, Default)]
pub struct UpdateFields {
    pub new_entity_id: Option<EntityId>,
    pub old_entity_id: Option<EntityId>,
    pub checksum: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<u64>,
    pub description: Patch<String>,
    pub metadata: Patch<Value>,
}

impl UpdateFields {
    pub fn is_empty(&self) -> bool {
        self.new_entity_id.is_none()
            && self.old_entity_id.is_none()
            && self.checksum.is_none()
            && self.mime_type.is_none()
            && self.file_size.is_none()
            && self.description.is_keep()
            && self.metadata.is_keep()
    }
}

/// The relational catalog of one bucket: a single `file_v0` table keyed by
/// `fullpath` with a unique index on `entityid`, persisted in WAL mode with
/// a checkpoint after every mutation.
pub struct BucketCatalogDB {
    bucket_name: BucketName,
    db_path: PathBuf,
    conn: Mutex<Option<Connection>>,
    max_description_size: usize,
    max_metadata_json_size: usize,
    to_fts_string: FtsStringFn,
}

impl BucketCatalogDB {
    pub fn new(
        bucket_name: BucketName,
        db_path: PathBuf,
        max_description_size: usize,
        max_metadata_json_size: usize,
        to_fts_string: Option<FtsStringFn>,
    ) -> Self {
        Self {
            bucket_name,
            db_path,
            conn: Mutex::new(None),
            max_description_size,
            max_metadata_json_size,
            to_fts_string: to_fts_string.unwrap_or_else(|| Arc::new(|s: &str| s.to_string())),
        }
    }

    pub fn bucket_name(&self) -> &BucketName {
        &self.bucket_name
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().unwrap().is_some()
    }

    pub fn connect(&self) -> MosResult<()> {
        let mut guard = self.conn.lock().unwrap();
        if guard.is_some() {
            return Ok(());
        }
        debug!(
            "BucketCatalogDB: connect {} at {}",
            self.bucket_name,
            self.db_path.to_string_lossy()
        );
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .map_err(|e| {
            warn!("BucketCatalogDB: open db failed! {}", e);
            MosError::DbError(e.to_string())
        })?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .map_err(|e| {
                warn!("BucketCatalogDB: enable WAL failed! {}", e);
                MosError::DbError(e.to_string())
            })?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS file_v0 (
                fullpath TEXT PRIMARY KEY,
                path_seg TEXT NOT NULL,
                seg_count INTEGER NOT NULL,
                entityid TEXT NOT NULL,
                hash_md5 TEXT NOT NULL,
                mime_typ TEXT NOT NULL,
                cont_len INTEGER NOT NULL,
                last_mod INTEGER NOT NULL,
                desc_raw TEXT,
                desc_fts TEXT,
                meta_js TEXT
            )",
            [],
        )
        .map_err(|e| {
            warn!("BucketCatalogDB: create table file_v0 failed! {}", e);
            MosError::DbError(e.to_string())
        })?;
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS file_v0_entityid ON file_v0 (entityid)",
            [],
        )
        .map_err(|e| {
            warn!("BucketCatalogDB: create entityid index failed! {}", e);
            MosError::DbError(e.to_string())
        })?;
        Self::checkpoint(&conn)?;
        *guard = Some(conn);
        Ok(())
    }

    pub fn disconnect(&self) -> MosResult<()> {
        let mut guard = self.conn.lock().unwrap();
        let Some(conn) = guard.take() else {
            return Ok(());
        };
        Self::checkpoint(&conn)?;
        conn.close().map_err(|(_, e)| {
            warn!("BucketCatalogDB: close db failed! {}", e);
            MosError::DbError(e.to_string())
        })
    }

    fn checkpoint(conn: &Connection) -> MosResult<()> {
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .map_err(|e| {
                warn!("BucketCatalogDB: checkpoint failed! {}", e);
                MosError::DbError(e.to_string())
            })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> MosResult<T>) -> MosResult<T> {
        let guard = self.conn.lock().unwrap();
        let conn = guard
            .as_ref()
            .ok_or_else(|| MosError::InvalidState("catalog not connected".to_string()))?;
        f(conn)
    }

    fn not_found(&self, path: &str) -> MosError {
        MosError::FileNotFound(format!("{}:{}", self.bucket_name, path))
    }

    fn already_exists(&self, path: &str) -> MosError {
        MosError::FileExists(format!("{}:{}", self.bucket_name, path))
    }

    /// A `fullpath` collision is the domain outcome "already exists"; an
    /// `entityid` collision means the caller failed to allocate a fresh id
    /// and stays a generic db error.
    fn map_stmt_err(&self, path: &str, e: rusqlite::Error) -> MosError {
        if let rusqlite::Error::SqliteFailure(f, Some(msg)) = &e {
            if f.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.contains("file_v0.fullpath")
            {
                return self.already_exists(path);
            }
        }
        warn!("BucketCatalogDB: statement failed! {}", e);
        MosError::DbError(e.to_string())
    }

    fn map_query_err(&self, e: rusqlite::Error) -> MosError {
        warn!("BucketCatalogDB: query failed! {}", e);
        MosError::DbError(e.to_string())
    }

    /// Validates the description bound and returns the tokenized fts string
    /// (hook applied) for storage alongside the raw text.
    fn validate_description(&self, description: Option<&str>) -> MosResult<Option<String>> {
        let Some(desc) = description else {
            return Ok(None);
        };
        let chars = desc.chars().count();
        if chars * 2 > self.max_description_size {
            return Err(MosError::InvalidParam(format!(
                "description too long: {} chars exceeds budget of {} bytes",
                chars, self.max_description_size
            )));
        }
        let fts = (self.to_fts_string)(desc);
        if fts.chars().count() > self.max_description_size * 2 {
            return Err(MosError::InvalidParam(
                "full-text search string too long".to_string(),
            ));
        }
        Ok(Some(fts))
    }

    fn validate_metadata(&self, metadata: Option<&Value>) -> MosResult<Option<String>> {
        let Some(meta) = metadata else {
            return Ok(None);
        };
        let text = serde_json::to_string(meta)
            .map_err(|e| MosError::InvalidData(format!("metadata encode failed: {}", e)))?;
        if text.len() > self.max_metadata_json_size {
            return Err(MosError::InvalidParam(format!(
                "metadata too long: {} bytes exceeds {}",
                text.len(),
                self.max_metadata_json_size
            )));
        }
        Ok(Some(text))
    }

    fn seg_json(path: &FilePath) -> MosResult<String> {
        serde_json::to_string(path.segments()).map_err(|e| MosError::Internal(e.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        file_path: &FilePath,
        entity_id: &EntityId,
        checksum: &str,
        mime_type: Option<String>,
        file_size: u64,
        description: Option<&str>,
        metadata: Option<&Value>,
    ) -> MosResult<()> {
        let mime = mime_type.unwrap_or_else(|| mime_from_basename(file_path.basename()));
        let desc_fts = self.validate_description(description)?;
        let meta_js = self.validate_metadata(metadata)?;
        let seg_json = Self::seg_json(file_path)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO file_v0 (fullpath, path_seg, seg_count, entityid, hash_md5, \
                 mime_typ, cont_len, last_mod, desc_raw, desc_fts, meta_js) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    file_path.fullpath(),
                    seg_json,
                    file_path.segments().len() as i64,
                    entity_id.as_str(),
                    checksum,
                    mime,
                    file_size as i64,
                    unix_timestamp_ms(),
                    description,
                    desc_fts,
                    meta_js,
                ],
            )
            .map_err(|e| self.map_stmt_err(file_path.fullpath(), e))?;
            Self::checkpoint(conn)
        })
    }

    pub fn read(&self, file_path: &FilePath) -> MosResult<FileInfo> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT entityid, hash_md5, mime_typ, cont_len, last_mod \
                     FROM file_v0 WHERE fullpath = ?1",
                    params![file_path.fullpath()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| self.map_query_err(e))?;
            let (entity, checksum, mime_type, cont_len, last_mod) =
                row.ok_or_else(|| self.not_found(file_path.fullpath()))?;
            Ok(FileInfo {
                entity_id: EntityId::parse(&entity)?,
                checksum,
                mime_type,
                file_size: cont_len as u64,
                last_modified: last_mod,
            })
        })
    }

    pub fn read_entity_id(&self, file_path: &FilePath) -> MosResult<EntityId> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT entityid FROM file_v0 WHERE fullpath = ?1",
                    params![file_path.fullpath()],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(|e| self.map_query_err(e))?;
            let entity = row.ok_or_else(|| self.not_found(file_path.fullpath()))?;
            EntityId::parse(&entity)
        })
    }

    pub fn read_description(&self, file_path: &FilePath) -> MosResult<Option<String>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT desc_raw FROM file_v0 WHERE fullpath = ?1",
                    params![file_path.fullpath()],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
                .map_err(|e| self.map_query_err(e))?;
            row.ok_or_else(|| self.not_found(file_path.fullpath()))
        })
    }

    pub fn read_metadata(&self, file_path: &FilePath) -> MosResult<Option<Value>> {
        let meta_js = self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT meta_js FROM file_v0 WHERE fullpath = ?1",
                    params![file_path.fullpath()],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
                .map_err(|e| self.map_query_err(e))?;
            row.ok_or_else(|| self.not_found(file_path.fullpath()))
        })?;
        match meta_js {
            None => Ok(None),
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| MosError::InvalidData(format!("metadata decode failed: {}", e))),
        }
    }

    pub fn move_file(&self, src: &FilePath, dst: &FilePath) -> MosResult<()> {
        let seg_json = Self::seg_json(dst)?;
        self.with_conn(|conn| {
            let affected = conn
                .execute(
                    "UPDATE file_v0 SET fullpath = ?1, path_seg = ?2, seg_count = ?3 \
                     WHERE fullpath = ?4",
                    params![
                        dst.fullpath(),
                        seg_json,
                        dst.segments().len() as i64,
                        src.fullpath(),
                    ],
                )
                .map_err(|e| self.map_stmt_err(dst.fullpath(), e))?;
            if affected == 0 {
                return Err(self.not_found(src.fullpath()));
            }
            Self::checkpoint(conn)
        })
    }

    /// Clones every side-metadata column of `src` into a new row under
    /// `dst` with a fresh entity id.
    pub fn copy_file(
        &self,
        src: &FilePath,
        dst: &FilePath,
        dst_entity_id: &EntityId,
    ) -> MosResult<()> {
        let seg_json = Self::seg_json(dst)?;
        self.with_conn(|conn| {
            let affected = conn
                .execute(
                    "INSERT INTO file_v0 (fullpath, path_seg, seg_count, entityid, hash_md5, \
                     mime_typ, cont_len, last_mod, desc_raw, desc_fts, meta_js) \
                     SELECT ?1, ?2, ?3, ?4, hash_md5, mime_typ, cont_len, last_mod, \
                     desc_raw, desc_fts, meta_js FROM file_v0 WHERE fullpath = ?5",
                    params![
                        dst.fullpath(),
                        seg_json,
                        dst.segments().len() as i64,
                        dst_entity_id.as_str(),
                        src.fullpath(),
                    ],
                )
                .map_err(|e| self.map_stmt_err(dst.fullpath(), e))?;
            if affected == 0 {
                return Err(self.not_found(src.fullpath()));
            }
            Self::checkpoint(conn)
        })
    }

    pub fn update(&self, file_path: &FilePath, fields: &UpdateFields) -> MosResult<()> {
        if fields.is_empty() {
            return self.with_conn(|conn| {
                let row = conn
                    .query_row(
                        "SELECT 1 FROM file_v0 WHERE fullpath = ?1",
                        params![file_path.fullpath()],
                        |_| Ok(()),
                    )
                    .optional()
                    .map_err(|e| self.map_query_err(e))?;
                row.ok_or_else(|| self.not_found(file_path.fullpath()))
            });
        }

        let mut sets: Vec<&str> = vec!["last_mod = ?"];
        let mut values: Vec<SqlValue> = vec![SqlValue::Integer(unix_timestamp_ms())];

        if let Some(entity) = &fields.new_entity_id {
            sets.push("entityid = ?");
            values.push(SqlValue::Text(entity.as_str().to_string()));
        }
        if let Some(checksum) = &fields.checksum {
            sets.push("hash_md5 = ?");
            values.push(SqlValue::Text(checksum.clone()));
        }
        if let Some(mime) = &fields.mime_type {
            sets.push("mime_typ = ?");
            values.push(SqlValue::Text(mime.clone()));
        }
        if let Some(size) = fields.file_size {
            sets.push("cont_len = ?");
            values.push(SqlValue::Integer(size as i64));
        }
        match &fields.description {
            Patch::Keep => {}
            Patch::Clear => {
                sets.push("desc_raw = NULL");
                sets.push("desc_fts = NULL");
            }
            Patch::Set(desc) => {
                let fts = self
                    .validate_description(Some(desc.as_str()))?
                    .unwrap_or_default();
                sets.push("desc_raw = ?");
                values.push(SqlValue::Text(desc.clone()));
                sets.push("desc_fts = ?");
                values.push(SqlValue::Text(fts));
            }
        }
        match &fields.metadata {
            Patch::Keep => {}
            Patch::Clear => {
                sets.push("meta_js = NULL");
            }
            Patch::Set(meta) => {
                let text = self.validate_metadata(Some(meta))?.unwrap_or_default();
                sets.push("meta_js = ?");
                values.push(SqlValue::Text(text));
            }
        }

        let mut sql = format!("UPDATE file_v0 SET {} WHERE fullpath = ?", sets.join(", "));
        values.push(SqlValue::Text(file_path.fullpath().to_string()));
        if let Some(old) = &fields.old_entity_id {
            sql.push_str(" AND entityid = ?");
            values.push(SqlValue::Text(old.as_str().to_string()));
        }

        self.with_conn(|conn| {
            let affected = conn
                .execute(&sql, params_from_iter(values))
                .map_err(|e| self.map_stmt_err(file_path.fullpath(), e))?;
            if affected == 0 {
                // No row, or a stale old_entity_id guard.
                return Err(self.not_found(file_path.fullpath()));
            }
            Self::checkpoint(conn)
        })
    }

    pub fn delete(&self, file_path: &FilePath) -> MosResult<()> {
        self.with_conn(|conn| {
            let affected = conn
                .execute(
                    "DELETE FROM file_v0 WHERE fullpath = ?1",
                    params![file_path.fullpath()],
                )
                .map_err(|e| self.map_stmt_err(file_path.fullpath(), e))?;
            if affected == 0 {
                return Err(self.not_found(file_path.fullpath()));
            }
            Self::checkpoint(conn)
        })
    }

    pub fn exists_file(&self, file_path: &FilePath) -> MosResult<bool> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT 1 FROM file_v0 WHERE fullpath = ?1",
                    params![file_path.fullpath()],
                    |_| Ok(()),
                )
                .optional()
                .map_err(|e| self.map_query_err(e))?;
            Ok(row.is_some())
        })
    }

    /// A directory exists iff some row lies strictly below it. The empty
    /// directory path is the bucket root and always exists.
    pub fn exists_dir(&self, dir: &[String]) -> MosResult<bool> {
        let Some((prefix, plen)) = Self::dir_prefix(dir) else {
            return Ok(true);
        };
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT 1 FROM file_v0 WHERE substr(fullpath, 1, ?1) = ?2 LIMIT 1",
                    params![plen, prefix],
                    |_| Ok(()),
                )
                .optional()
                .map_err(|e| self.map_query_err(e))?;
            Ok(row.is_some())
        })
    }

    /// The same string can name a file and a directory prefix of deeper
    /// files at once.
    pub fn stat(&self, file_path: &FilePath) -> MosResult<FileStat> {
        Ok(FileStat {
            is_file: self.exists_file(file_path)?,
            is_directory: self.exists_dir(file_path.segments())?,
        })
    }

    /// Componentwise directory match compiled to a string-prefix predicate:
    /// the first `|dir|` segments of a row equal `dir` iff its fullpath
    /// starts with `join(dir) + "/"`. Lengths are character counts, which is
    /// what SQLite's `substr` operates on.
    fn dir_prefix(dir: &[String]) -> Option<(String, i64)> {
        if dir.is_empty() {
            return None;
        }
        let prefix = format!("{}/", dir.join("/"));
        let plen = prefix.chars().count() as i64;
        Some((prefix, plen))
    }

    /// Rebuilds the BM25 index over the candidate descriptions and scores
    /// `query` against it. Results come back ordered by descending score.
    pub fn search(
        &self,
        dir: &[String],
        query: &str,
        opts: &SearchOptions,
    ) -> MosResult<Vec<SearchResult>> {
        let depth_op = if opts.recursive { ">=" } else { "=" };
        let mut sql = format!(
            "SELECT fullpath, desc_raw, desc_fts FROM file_v0 \
             WHERE desc_fts IS NOT NULL AND seg_count {} ?",
            depth_op
        );
        let mut values: Vec<SqlValue> = vec![SqlValue::Integer(dir.len() as i64 + 1)];
        if let Some((prefix, plen)) = Self::dir_prefix(dir) {
            sql.push_str(" AND substr(fullpath, 1, ?) = ?");
            values.push(SqlValue::Integer(plen));
            values.push(SqlValue::Text(prefix));
        }

        let rows: Vec<(String, Option<String>, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(|e| self.map_query_err(e))?;
            let mapped = stmt
                .query_map(params_from_iter(values), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(|e| self.map_query_err(e))?;
            let mut rows = Vec::new();
            for row in mapped {
                rows.push(row.map_err(|e| self.map_query_err(e))?);
            }
            Ok(rows)
        })?;

        let index = Bm25Index::build(rows.iter().map(|(_, _, fts)| fts.as_str()));
        let scores = index.score_all(&(self.to_fts_string)(query));

        let mut results: Vec<SearchResult> = Vec::new();
        for ((fullpath, desc_raw, _), score) in rows.into_iter().zip(scores) {
            let Some(score) = score else {
                continue;
            };
            if score < opts.score_threshold {
                continue;
            }
            results.push(SearchResult {
                file_path: FilePath::parse(&fullpath)?,
                description: desc_raw,
                search_score: score,
            });
        }
        results.sort_by(|a, b| {
            b.search_score
                .partial_cmp(&a.search_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file_path.fullpath().cmp(b.file_path.fullpath()))
        });
        if let Some(limit) = opts.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    /// Distinct immediate children of `dir`, directories before files, then
    /// by name.
    pub fn list(&self, dir: &[String], opts: &ListOptions) -> MosResult<Vec<ListEntry>> {
        let (where_clause, rest_start, mut values) = match Self::dir_prefix(dir) {
            None => (String::new(), 1i64, Vec::new()),
            Some((prefix, plen)) => (
                "WHERE substr(fullpath, 1, ?) = ?".to_string(),
                plen + 1,
                vec![SqlValue::Integer(plen), SqlValue::Text(prefix)],
            ),
        };
        let sql = format!(
            "SELECT DISTINCT \
             CASE WHEN instr(rest, '/') = 0 THEN rest \
                  ELSE substr(rest, 1, instr(rest, '/') - 1) END AS name, \
             CASE WHEN instr(rest, '/') = 0 THEN 1 ELSE 0 END AS is_file \
             FROM (SELECT substr(fullpath, ?) AS rest FROM file_v0 {}) \
             ORDER BY is_file ASC, name {} LIMIT ? OFFSET ?",
            where_clause,
            opts.order_by_name.as_sql()
        );
        values.insert(0, SqlValue::Integer(rest_start));
        values.push(SqlValue::Integer(
            opts.limit.map(|l| l as i64).unwrap_or(-1),
        ));
        values.push(SqlValue::Integer(opts.offset as i64));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(|e| self.map_query_err(e))?;
            let mapped = stmt
                .query_map(params_from_iter(values), |row| {
                    Ok(ListEntry {
                        name: row.get::<_, String>(0)?,
                        is_file: row.get::<_, i64>(1)? != 0,
                    })
                })
                .map_err(|e| self.map_query_err(e))?;
            let mut entries = Vec::new();
            for entry in mapped {
                entries.push(entry.map_err(|e| self.map_query_err(e))?);
            }
            Ok(entries)
        })
    }
}
