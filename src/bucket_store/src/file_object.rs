use mos_lib::{EntityId, FilePath, MosError, MosResult};
use serde_json::Value;
use std::sync::Arc;
use tokio::fs::File;

use crate::blob_store::BlobStore;
use crate::bucket_manager::FileIdent;
use crate::catalog_db::{BucketCatalogDB, FileInfo};

/// The value returned by a successful read: a metadata snapshot plus lazy
/// access to the blob content and the on-demand catalog projections.
pub struct StoredFile {
    ident: FileIdent,
    info: FileInfo,
    catalog: Arc<BucketCatalogDB>,
    blobs: Arc<BlobStore>,
}

impl std::fmt::Debug for StoredFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredFile")
            .field("ident", &self.ident)
            .field("info", &self.info)
            .finish()
    }
}

impl StoredFile {
    pub(crate) fn new(
        ident: FileIdent,
        info: FileInfo,
        catalog: Arc<BucketCatalogDB>,
        blobs: Arc<BlobStore>,
    ) -> Self {
        Self {
            ident,
            info,
            catalog,
            blobs,
        }
    }

    pub fn ident(&self) -> &FileIdent {
        &self.ident
    }

    pub fn file_path(&self) -> &FilePath {
        &self.ident.file_path
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.info.entity_id
    }

    pub fn size(&self) -> u64 {
        self.info.file_size
    }

    pub fn mime_type(&self) -> &str {
        &self.info.mime_type
    }

    pub fn checksum(&self) -> &str {
        &self.info.checksum
    }

    pub fn last_modified(&self) -> i64 {
        self.info.last_modified
    }

    /// Open the blob content as a fresh read stream.
    pub async fn open_stream(&self) -> MosResult<File> {
        self.blobs.open_reader(&self.info.entity_id).await
    }

    /// Open the blob content positioned at `offset`.
    pub async fn open_stream_from(&self, offset: u64) -> MosResult<File> {
        self.blobs.open_reader_at(&self.info.entity_id, offset).await
    }

    pub async fn bytes(&self) -> MosResult<Vec<u8>> {
        self.blobs.read_to_bytes(&self.info.entity_id).await
    }

    pub async fn text(&self) -> MosResult<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes).map_err(|_| {
            MosError::TypeMismatch("utf-8 text".to_string(), "binary content".to_string())
        })
    }

    pub async fn get_description(&self) -> MosResult<Option<String>> {
        self.catalog.read_description(self.file_path())
    }

    pub async fn get_metadata(&self) -> MosResult<Option<Value>> {
        self.catalog.read_metadata(self.file_path())
    }
}
