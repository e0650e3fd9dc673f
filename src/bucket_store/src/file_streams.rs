use log::{error, warn};
use mos_lib::{BucketName, EntityId, FilePath, Md5Hasher, MosError, MosResult};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::blob_store::{BlobStore, BlobWriter};
use crate::bucket_manager::FileIdent;
use crate::catalog_db::{BucketCatalogDB, Patch, UpdateFields};

/// Shared accumulation state of both stream kinds. The methods take
/// `&mut self`: the exclusive borrow rules out a second alias interleaving
/// across a suspension point, which is the guarantee the per-stream mutex
/// provides in the source design.
struct StreamCore {
    catalog: Arc<BucketCatalogDB>,
    blobs: Arc<BlobStore>,
    manager_opened: Arc<AtomicBool>,
    bucket_name: BucketName,
    file_path: FilePath,
    writer: BlobWriter,
    hasher: Md5Hasher,
    size: u64,
    closed: bool,
}

impl StreamCore {
    fn closed_err(&self) -> MosError {
        MosError::InvalidState(format!(
            "stream for {}:{} closed",
            self.bucket_name,
            self.file_path.fullpath()
        ))
    }

    fn ident(&self) -> FileIdent {
        FileIdent {
            bucket_name: self.bucket_name.clone(),
            file_path: self.file_path.clone(),
        }
    }

    /// Returns true when the chunk landed in the blob. The manager closing
    /// underneath the stream aborts the staged write.
    async fn write(&mut self, chunk: &[u8]) -> MosResult<bool> {
        if self.closed {
            return Err(self.closed_err());
        }
        if !self.manager_opened.load(Ordering::SeqCst) {
            self.closed = true;
            if let Err(e) = self.writer.abort().await {
                error!("FileStream: discard staged blob failed! {}", e);
            }
            return Err(MosError::InvalidState(format!(
                "bucket {} closed",
                self.bucket_name
            )));
        }
        if chunk.is_empty() {
            return Ok(false);
        }
        self.writer.write(chunk).await?;
        self.size += chunk.len() as u64;
        self.hasher.update(chunk);
        Ok(true)
    }

    async fn abort(&mut self, entity_id: &EntityId, reason: Option<&str>) -> MosResult<()> {
        if self.closed {
            return Err(self.closed_err());
        }
        self.closed = true;
        if let Some(reason) = reason {
            warn!(
                "FileStream: abort {}:{}: {}",
                self.bucket_name,
                self.file_path.fullpath(),
                reason
            );
        }
        let mut errors = Vec::new();
        if let Err(e) = self.writer.abort().await {
            errors.push(e);
            if let Err(e) = self.blobs.remove_scratch(entity_id).await {
                errors.push(e);
            }
        }
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(MosError::Aggregate(errors)),
        }
    }
}

/// Chunked writer that creates a new catalog row when closed.
pub struct WritableFileStream {
    core: StreamCore,
    entity_id: EntityId,
    pub file_type: Option<String>,
    pub file_description: Option<String>,
    pub file_metadata: Option<Value>,
}

impl WritableFileStream {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        catalog: Arc<BucketCatalogDB>,
        blobs: Arc<BlobStore>,
        manager_opened: Arc<AtomicBool>,
        bucket_name: BucketName,
        file_path: FilePath,
        entity_id: EntityId,
        writer: BlobWriter,
        file_type: Option<String>,
        file_description: Option<String>,
        file_metadata: Option<Value>,
    ) -> Self {
        Self {
            core: StreamCore {
                catalog,
                blobs,
                manager_opened,
                bucket_name,
                file_path,
                writer,
                hasher: Md5Hasher::new(),
                size: 0,
                closed: false,
            },
            entity_id,
            file_type,
            file_description,
            file_metadata,
        }
    }

    pub fn file_path(&self) -> &FilePath {
        &self.core.file_path
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn bytes_written(&self) -> u64 {
        self.core.size
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed
    }

    pub async fn write(&mut self, chunk: &[u8]) -> MosResult<()> {
        self.core.write(chunk).await.map(|_| ())
    }

    /// Commit: close the blob writer, then insert the catalog row. Either
    /// step failing removes the staged blob before the error surfaces.
    pub async fn close(&mut self) -> MosResult<FileIdent> {
        if self.core.closed {
            return Err(self.core.closed_err());
        }
        self.core.closed = true;

        if let Err(e) = self.core.writer.close().await {
            if let Err(re) = self.core.blobs.remove_scratch(&self.entity_id).await {
                error!("WritableFileStream: discard staged blob failed! {}", re);
            }
            return Err(e);
        }

        let checksum = self.core.hasher.finalize();
        let created = self.core.catalog.create(
            &self.core.file_path,
            &self.entity_id,
            &checksum,
            self.file_type.clone(),
            self.core.size,
            self.file_description.as_deref(),
            self.file_metadata.as_ref(),
        );
        if let Err(e) = created {
            if let Err(re) = self.core.blobs.remove(&self.entity_id).await {
                error!("WritableFileStream: remove staged blob failed! {}", re);
            }
            return Err(e);
        }
        Ok(self.core.ident())
    }

    pub async fn abort(&mut self, reason: Option<&str>) -> MosResult<()> {
        let entity_id = self.entity_id.clone();
        self.core.abort(&entity_id, reason).await
    }
}

/// Chunked writer that replaces an existing file's content under an
/// optimistic entity-id guard when closed.
pub struct OverwritableFileStream {
    core: StreamCore,
    old_entity_id: EntityId,
    new_entity_id: EntityId,
    update_entity_id: bool,
    pub file_type: Option<String>,
    pub file_description: Patch<String>,
    pub file_metadata: Patch<Value>,
}

impl OverwritableFileStream {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        catalog: Arc<BucketCatalogDB>,
        blobs: Arc<BlobStore>,
        manager_opened: Arc<AtomicBool>,
        bucket_name: BucketName,
        file_path: FilePath,
        old_entity_id: EntityId,
        new_entity_id: EntityId,
        writer: BlobWriter,
    ) -> Self {
        Self {
            core: StreamCore {
                catalog,
                blobs,
                manager_opened,
                bucket_name,
                file_path,
                writer,
                hasher: Md5Hasher::new(),
                size: 0,
                closed: false,
            },
            old_entity_id,
            new_entity_id,
            update_entity_id: false,
            file_type: None,
            file_description: Patch::Keep,
            file_metadata: Patch::Keep,
        }
    }

    pub fn file_path(&self) -> &FilePath {
        &self.core.file_path
    }

    pub fn new_entity_id(&self) -> &EntityId {
        &self.new_entity_id
    }

    pub fn bytes_written(&self) -> u64 {
        self.core.size
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed
    }

    pub async fn write(&mut self, chunk: &[u8]) -> MosResult<()> {
        if self.core.write(chunk).await? {
            self.update_entity_id = true;
        }
        Ok(())
    }

    /// Commit. With no prior write this is a metadata-only update and the
    /// staged blob is discarded unused. Otherwise the catalog update carries
    /// the old entity id as a guard: a concurrent overwrite already rotated
    /// the row and the commit fails without touching the old blob.
    pub async fn close(&mut self) -> MosResult<FileIdent> {
        if self.core.closed {
            return Err(self.core.closed_err());
        }
        self.core.closed = true;

        if !self.update_entity_id {
            let fields = UpdateFields {
                mime_type: self.file_type.clone(),
                description: self.file_description.clone(),
                metadata: self.file_metadata.clone(),
                ..Default::default()
            };
            let updated = self.core.catalog.update(&self.core.file_path, &fields);
            if let Err(e) = self.core.writer.abort().await {
                error!("OverwritableFileStream: discard staged blob failed! {}", e);
            }
            updated?;
            return Ok(self.core.ident());
        }

        if let Err(e) = self.core.writer.close().await {
            if let Err(re) = self.core.blobs.remove_scratch(&self.new_entity_id).await {
                error!("OverwritableFileStream: discard staged blob failed! {}", re);
            }
            return Err(e);
        }

        let checksum = self.core.hasher.finalize();
        let fields = UpdateFields {
            new_entity_id: Some(self.new_entity_id.clone()),
            old_entity_id: Some(self.old_entity_id.clone()),
            checksum: Some(checksum),
            file_size: Some(self.core.size),
            mime_type: self.file_type.clone(),
            description: self.file_description.clone(),
            metadata: self.file_metadata.clone(),
        };
        match self.core.catalog.update(&self.core.file_path, &fields) {
            Ok(()) => {
                if let Err(e) = self.core.blobs.remove(&self.old_entity_id).await {
                    error!("OverwritableFileStream: remove old blob failed! {}", e);
                }
                Ok(self.core.ident())
            }
            Err(e) => {
                if let Err(re) = self.core.blobs.remove(&self.new_entity_id).await {
                    error!("OverwritableFileStream: remove new blob failed! {}", re);
                }
                Err(e)
            }
        }
    }

    pub async fn abort(&mut self, reason: Option<&str>) -> MosResult<()> {
        let entity_id = self.new_entity_id.clone();
        self.core.abort(&entity_id, reason).await
    }
}
