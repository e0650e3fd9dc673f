use log::{error, info, warn};
use mos_lib::{BucketName, EntityId, FilePath, Md5Hasher, MosError, MosResult};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::access_queue::AccessQueue;
use crate::blob_store::BlobStore;
use crate::catalog_db::{
    BucketCatalogDB, FileStat, FtsStringFn, ListEntry, ListOptions, Patch, SearchOptions,
    SearchResult, UpdateFields, CATALOG_DB_FILE, DEFAULT_MAX_DESCRIPTION_SIZE,
    DEFAULT_MAX_METADATA_JSON_SIZE,
};
use crate::file_object::StoredFile;
use crate::file_streams::{OverwritableFileStream, WritableFileStream};

pub const STORE_DIR_NAME: &str = "managed-opfs";

const COPY_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    pub max_description_size: usize,
    pub max_metadata_json_size: usize,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            max_description_size: DEFAULT_MAX_DESCRIPTION_SIZE,
            max_metadata_json_size: DEFAULT_MAX_METADATA_JSON_SIZE,
        }
    }
}

/// The bucket-qualified name of one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdent {
    pub bucket_name: BucketName,
    pub file_path: FilePath,
}

#[derive(Debug, Clone, Default)]
pub struct WriteFileOptions {
    pub mime_type: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct OverwriteFileOptions {
    pub data: Option<Vec<u8>>,
    pub mime_type: Option<String>,
    pub description: Patch<String>,
    pub metadata: Patch<Value>,
}

impl OverwriteFileOptions {
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
            && self.mime_type.is_none()
            && self.description.is_keep()
            && self.metadata.is_keep()
    }
}

/// Coordinator of one bucket: pairs every blob mutation with its catalog
/// mutation and recovers orphaned state on each failure edge. Mutators run
/// in exclusive queue slots, readers share slots; see `AccessQueue`.
pub struct BucketManager {
    bucket_name: BucketName,
    bucket_dir: PathBuf,
    queue: AccessQueue,
    catalog: Arc<BucketCatalogDB>,
    blobs: Mutex<Option<Arc<BlobStore>>>,
    opened: Arc<AtomicBool>,
}

impl std::fmt::Debug for BucketManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketManager")
            .field("bucket_name", &self.bucket_name)
            .field("bucket_dir", &self.bucket_dir)
            .finish()
    }
}

impl BucketManager {
    pub fn new(
        root_dir: impl AsRef<Path>,
        bucket_name: &str,
        config: BucketConfig,
    ) -> MosResult<Self> {
        Self::new_with_fts_transform(root_dir, bucket_name, config, None)
    }

    pub fn new_with_fts_transform(
        root_dir: impl AsRef<Path>,
        bucket_name: &str,
        config: BucketConfig,
        to_fts_string: Option<FtsStringFn>,
    ) -> MosResult<Self> {
        let bucket_name = BucketName::parse(bucket_name)?;
        let bucket_dir = root_dir
            .as_ref()
            .join(STORE_DIR_NAME)
            .join(bucket_name.as_str());
        let catalog = BucketCatalogDB::new(
            bucket_name.clone(),
            bucket_dir.join(CATALOG_DB_FILE),
            config.max_description_size,
            config.max_metadata_json_size,
            to_fts_string,
        );
        Ok(Self {
            bucket_name,
            bucket_dir,
            queue: AccessQueue::new(),
            catalog: Arc::new(catalog),
            blobs: Mutex::new(None),
            opened: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn bucket_name(&self) -> &BucketName {
        &self.bucket_name
    }

    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }

    pub fn opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Ensure the bucket directories exist and connect the catalog.
    /// Idempotent.
    pub async fn open(&self) -> MosResult<()> {
        let _guard = self.queue.acquire_write().await;
        if self.opened() {
            return Ok(());
        }
        fs::create_dir_all(&self.bucket_dir).await.map_err(|e| {
            warn!("BucketManager: create bucket dir failed! {}", e);
            MosError::IoError(e.to_string())
        })?;
        let blobs = BlobStore::init(&self.bucket_dir).await?;
        self.catalog.connect()?;
        *self.blobs.lock().unwrap() = Some(Arc::new(blobs));
        self.opened.store(true, Ordering::SeqCst);
        info!("BucketManager: bucket {} opened", self.bucket_name);
        Ok(())
    }

    /// Disconnect the catalog and drop the blob handle. Idempotent.
    pub async fn close(&self) -> MosResult<()> {
        let _guard = self.queue.acquire_write().await;
        if !self.opened() {
            return Ok(());
        }
        self.catalog.disconnect()?;
        *self.blobs.lock().unwrap() = None;
        self.opened.store(false, Ordering::SeqCst);
        info!("BucketManager: bucket {} closed", self.bucket_name);
        Ok(())
    }

    fn blobs(&self) -> MosResult<Arc<BlobStore>> {
        self.blobs.lock().unwrap().clone().ok_or_else(|| {
            MosError::InvalidState(format!("bucket {} not open", self.bucket_name))
        })
    }

    fn ident(&self, path: &FilePath) -> FileIdent {
        FileIdent {
            bucket_name: self.bucket_name.clone(),
            file_path: path.clone(),
        }
    }

    fn not_found(&self, path: &FilePath) -> MosError {
        MosError::FileNotFound(format!("{}:{}", self.bucket_name, path.fullpath()))
    }

    /// Drop a catalog row whose blob has gone missing. Failures are logged,
    /// never raised: the caller is already surfacing the real outcome.
    fn heal_dangling_row(&self, path: &FilePath) {
        warn!(
            "BucketManager: dangling catalog row for {}:{}, removing",
            self.bucket_name,
            path.fullpath()
        );
        if let Err(e) = self.catalog.delete(path) {
            error!("BucketManager: self-heal delete failed! {}", e);
        }
    }

    /// Stage `data` into a fresh blob, compensating on every failure edge.
    async fn stage_blob(
        &self,
        blobs: &BlobStore,
        entity_id: &EntityId,
        data: &[u8],
    ) -> MosResult<()> {
        let mut writer = blobs.open_writer(entity_id).await?;
        if let Err(e) = writer.write(data).await {
            if let Err(re) = writer.abort().await {
                error!("BucketManager: abort staged blob failed! {}", re);
            }
            return Err(e);
        }
        if let Err(e) = writer.close().await {
            if let Err(re) = blobs.remove_scratch(entity_id).await {
                error!("BucketManager: discard staged blob failed! {}", re);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Write a whole in-memory payload as a new file.
    pub async fn write_file(
        &self,
        path: &FilePath,
        data: &[u8],
        opts: &WriteFileOptions,
    ) -> MosResult<FileIdent> {
        let _guard = self.queue.acquire_write().await;
        self.write_file_impl(path, data, opts).await
    }

    async fn write_file_impl(
        &self,
        path: &FilePath,
        data: &[u8],
        opts: &WriteFileOptions,
    ) -> MosResult<FileIdent> {
        let blobs = self.blobs()?;
        let checksum = Md5Hasher::calc_from_bytes(data);
        let entity_id = EntityId::new();
        self.stage_blob(&blobs, &entity_id, data).await?;

        let created = self.catalog.create(
            path,
            &entity_id,
            &checksum,
            opts.mime_type.clone(),
            data.len() as u64,
            opts.description.as_deref(),
            opts.metadata.as_ref(),
        );
        if let Err(e) = created {
            if let Err(re) = blobs.remove(&entity_id).await {
                error!("BucketManager: remove orphan blob failed! {}", re);
            }
            return Err(e);
        }
        Ok(self.ident(path))
    }

    /// Open a chunked writer for a new file. The catalog row appears only
    /// when the stream closes.
    pub async fn create_writable(
        &self,
        path: &FilePath,
        opts: &WriteFileOptions,
    ) -> MosResult<WritableFileStream> {
        let _guard = self.queue.acquire_read().await;
        let blobs = self.blobs()?;
        let entity_id = EntityId::new();
        let writer = match blobs.open_writer(&entity_id).await {
            Ok(writer) => writer,
            Err(e) => {
                if let Err(re) = blobs.remove_scratch(&entity_id).await {
                    error!("BucketManager: discard staged entity failed! {}", re);
                }
                return Err(e);
            }
        };
        Ok(WritableFileStream::new(
            self.catalog.clone(),
            blobs,
            self.opened.clone(),
            self.bucket_name.clone(),
            path.clone(),
            entity_id,
            writer,
            opts.mime_type.clone(),
            opts.description.clone(),
            opts.metadata.clone(),
        ))
    }

    /// Open a chunked writer that replaces an existing file when it closes.
    pub async fn create_overwritable(&self, path: &FilePath) -> MosResult<OverwritableFileStream> {
        let _guard = self.queue.acquire_read().await;
        let blobs = self.blobs()?;
        let old_entity_id = self.catalog.read_entity_id(path)?;
        let new_entity_id = EntityId::new();
        let writer = match blobs.open_writer(&new_entity_id).await {
            Ok(writer) => writer,
            Err(e) => {
                if let Err(re) = blobs.remove_scratch(&new_entity_id).await {
                    error!("BucketManager: discard staged entity failed! {}", re);
                }
                return Err(e);
            }
        };
        Ok(OverwritableFileStream::new(
            self.catalog.clone(),
            blobs,
            self.opened.clone(),
            self.bucket_name.clone(),
            path.clone(),
            old_entity_id,
            new_entity_id,
            writer,
        ))
    }

    pub async fn read_file(&self, path: &FilePath) -> MosResult<StoredFile> {
        let _guard = self.queue.acquire_read().await;
        self.read_file_impl(path).await
    }

    async fn read_file_impl(&self, path: &FilePath) -> MosResult<StoredFile> {
        let blobs = self.blobs()?;
        let info = self.catalog.read(path)?;
        if !blobs.exists(&info.entity_id).await? {
            self.heal_dangling_row(path);
            return Err(self.not_found(path));
        }
        Ok(StoredFile::new(
            self.ident(path),
            info,
            self.catalog.clone(),
            blobs,
        ))
    }

    /// Rename in the catalog only; the blob never moves.
    pub async fn move_file(&self, src: &FilePath, dst: &FilePath) -> MosResult<FileIdent> {
        let _guard = self.queue.acquire_write().await;
        self.blobs()?;
        self.catalog.move_file(src, dst)?;
        Ok(self.ident(dst))
    }

    /// Duplicate the blob bytes under a fresh entity and clone the catalog
    /// row's side-metadata.
    pub async fn copy_file(&self, src: &FilePath, dst: &FilePath) -> MosResult<FileIdent> {
        let _guard = self.queue.acquire_write().await;
        self.copy_file_impl(src, dst).await
    }

    async fn copy_file_impl(&self, src: &FilePath, dst: &FilePath) -> MosResult<FileIdent> {
        let blobs = self.blobs()?;
        let src_entity_id = self.catalog.read_entity_id(src)?;
        let mut reader = match blobs.open_reader(&src_entity_id).await {
            Ok(reader) => reader,
            Err(e) if e.is_not_found() => {
                self.heal_dangling_row(src);
                return Err(self.not_found(src));
            }
            Err(e) => return Err(e),
        };

        let dst_entity_id = EntityId::new();
        let mut writer = match blobs.open_writer(&dst_entity_id).await {
            Ok(writer) => writer,
            Err(e) => {
                if let Err(re) = blobs.remove_scratch(&dst_entity_id).await {
                    error!("BucketManager: discard staged entity failed! {}", re);
                }
                return Err(e);
            }
        };

        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    if let Err(re) = writer.abort().await {
                        error!("BucketManager: abort copy target failed! {}", re);
                    }
                    return Err(MosError::IoError(e.to_string()));
                }
            };
            if n == 0 {
                break;
            }
            if let Err(e) = writer.write(&buf[..n]).await {
                if let Err(re) = writer.abort().await {
                    error!("BucketManager: abort copy target failed! {}", re);
                }
                return Err(e);
            }
        }
        if let Err(e) = writer.close().await {
            if let Err(re) = blobs.remove_scratch(&dst_entity_id).await {
                error!("BucketManager: discard copy target failed! {}", re);
            }
            return Err(e);
        }

        if let Err(e) = self.catalog.copy_file(src, dst, &dst_entity_id) {
            if let Err(re) = blobs.remove(&dst_entity_id).await {
                error!("BucketManager: remove copy target failed! {}", re);
            }
            return Err(e);
        }
        Ok(self.ident(dst))
    }

    /// Replace content and/or side-metadata in place. A content overwrite
    /// rotates the entity id: the new blob commits under an optimistic
    /// guard on the old id, and the old blob is deleted only afterwards.
    pub async fn overwrite_file(
        &self,
        path: &FilePath,
        opts: &OverwriteFileOptions,
    ) -> MosResult<FileIdent> {
        let _guard = self.queue.acquire_write().await;
        self.overwrite_file_impl(path, opts).await
    }

    async fn overwrite_file_impl(
        &self,
        path: &FilePath,
        opts: &OverwriteFileOptions,
    ) -> MosResult<FileIdent> {
        let blobs = self.blobs()?;
        if opts.is_empty() {
            // Nothing to change; still verify the row exists.
            self.catalog.update(path, &UpdateFields::default())?;
            return Ok(self.ident(path));
        }

        let Some(data) = &opts.data else {
            let fields = UpdateFields {
                mime_type: opts.mime_type.clone(),
                description: opts.description.clone(),
                metadata: opts.metadata.clone(),
                ..Default::default()
            };
            self.catalog.update(path, &fields)?;
            return Ok(self.ident(path));
        };

        let old_entity_id = self.catalog.read_entity_id(path)?;
        let new_entity_id = EntityId::new();
        let checksum = Md5Hasher::calc_from_bytes(data);
        self.stage_blob(&blobs, &new_entity_id, data).await?;

        let fields = UpdateFields {
            new_entity_id: Some(new_entity_id.clone()),
            old_entity_id: Some(old_entity_id.clone()),
            checksum: Some(checksum),
            file_size: Some(data.len() as u64),
            mime_type: opts.mime_type.clone(),
            description: opts.description.clone(),
            metadata: opts.metadata.clone(),
        };
        match self.catalog.update(path, &fields) {
            Ok(()) => {
                if let Err(e) = blobs.remove(&old_entity_id).await {
                    error!("BucketManager: remove old blob failed! {}", e);
                }
                Ok(self.ident(path))
            }
            Err(e) => {
                if let Err(re) = blobs.remove(&new_entity_id).await {
                    error!("BucketManager: remove new blob failed! {}", re);
                }
                Err(e)
            }
        }
    }

    /// Remove the blob, then the row. A missing blob still deletes the row
    /// but reports the entity mismatch; a missing row is a plain not-found.
    pub async fn remove_file(&self, path: &FilePath) -> MosResult<()> {
        let _guard = self.queue.acquire_write().await;
        let blobs = self.blobs()?;
        let entity_id = self.catalog.read_entity_id(path)?;
        match blobs.remove(&entity_id).await {
            Ok(()) => self.catalog.delete(path),
            Err(e) if e.is_not_found() => {
                if let Err(de) = self.catalog.delete(path) {
                    error!("BucketManager: cleanup dangling row failed! {}", de);
                }
                Err(MosError::FileExists(format!(
                    "{}:{} entity mismatch",
                    self.bucket_name,
                    path.fullpath()
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// File existence requires both the row and its blob; a dangling row is
    /// healed and reported absent.
    pub async fn exists_file(&self, path: &FilePath) -> MosResult<bool> {
        let _guard = self.queue.acquire_read().await;
        let blobs = self.blobs()?;
        let entity_id = match self.catalog.read_entity_id(path) {
            Ok(id) => id,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        if blobs.exists(&entity_id).await? {
            Ok(true)
        } else {
            self.heal_dangling_row(path);
            Ok(false)
        }
    }

    pub async fn exists_dir(&self, dir: &[String]) -> MosResult<bool> {
        let _guard = self.queue.acquire_read().await;
        self.blobs()?;
        self.catalog.exists_dir(dir)
    }

    pub async fn stat(&self, path: &FilePath) -> MosResult<FileStat> {
        let _guard = self.queue.acquire_read().await;
        self.blobs()?;
        self.catalog.stat(path)
    }

    pub async fn search_file(
        &self,
        dir: &[String],
        query: &str,
        opts: &SearchOptions,
    ) -> MosResult<Vec<SearchResult>> {
        let _guard = self.queue.acquire_read().await;
        self.blobs()?;
        self.catalog.search(dir, query, opts)
    }

    pub async fn list(&self, dir: &[String], opts: &ListOptions) -> MosResult<Vec<ListEntry>> {
        let _guard = self.queue.acquire_read().await;
        self.blobs()?;
        self.catalog.list(dir, opts)
    }
}

static BUCKET_REGISTRY: Lazy<Mutex<HashMap<String, Arc<BucketManager>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Shared manager per bucket name. The first call creates and opens the
/// bucket; later calls return the cached instance.
pub async fn get_bucket_manager(
    root_dir: impl AsRef<Path>,
    bucket_name: &str,
    config: BucketConfig,
) -> MosResult<Arc<BucketManager>> {
    {
        let registry = BUCKET_REGISTRY.lock().unwrap();
        if let Some(mgr) = registry.get(bucket_name) {
            return Ok(mgr.clone());
        }
    }
    let mgr = Arc::new(BucketManager::new(root_dir, bucket_name, config)?);
    mgr.open().await?;
    let mut registry = BUCKET_REGISTRY.lock().unwrap();
    Ok(registry
        .entry(bucket_name.to_string())
        .or_insert(mgr)
        .clone())
}
