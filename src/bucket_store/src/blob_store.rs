use fs2::FileExt;
use log::warn;
use mos_lib::{EntityId, MosError, MosResult};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};

pub const BLOB_DIR_NAME: &str = "main";
const BLOB_SCRATCH_EXT: &str = "crswap";

/// Flat directory of uuid-named blobs under `<bucket-dir>/main/`.
///
/// Writers stage into `<uuid>.crswap` and rename onto the final name on
/// close, so a blob either exists completely or not at all. Platform
/// not-found errors normalize to `FileNotFound`.
pub struct BlobStore {
    main_dir: PathBuf,
}

impl BlobStore {
    pub async fn init(bucket_dir: &Path) -> MosResult<Self> {
        let main_dir = bucket_dir.join(BLOB_DIR_NAME);
        fs::create_dir_all(&main_dir).await.map_err(|e| {
            warn!("BlobStore: create blob dir failed! {}", e);
            MosError::IoError(e.to_string())
        })?;
        Ok(Self { main_dir })
    }

    pub fn main_dir(&self) -> &Path {
        &self.main_dir
    }

    fn blob_path(&self, entity_id: &EntityId) -> PathBuf {
        self.main_dir.join(entity_id.as_str())
    }

    fn scratch_path(&self, entity_id: &EntityId) -> PathBuf {
        self.main_dir
            .join(format!("{}.{}", entity_id.as_str(), BLOB_SCRATCH_EXT))
    }

    fn map_io_err(&self, entity_id: &EntityId, e: std::io::Error) -> MosError {
        if e.kind() == std::io::ErrorKind::NotFound {
            MosError::FileNotFound(format!("entity {} not in blob store", entity_id))
        } else {
            warn!("BlobStore: blob {} access failed! {}", entity_id, e);
            MosError::IoError(e.to_string())
        }
    }

    /// Open a staged writer for a fresh entity. The scratch file is held
    /// under an exclusive lock until the writer closes or aborts.
    pub async fn open_writer(&self, entity_id: &EntityId) -> MosResult<BlobWriter> {
        let scratch = self.scratch_path(entity_id);
        let file = File::create(&scratch).await.map_err(|e| {
            warn!("BlobStore: create scratch {} failed! {}", entity_id, e);
            MosError::IoError(e.to_string())
        })?;
        let std_file = file.into_std().await;
        std_file.try_lock_exclusive().map_err(|e| {
            warn!("BlobStore: lock scratch {} failed! {}", entity_id, e);
            MosError::IoError(e.to_string())
        })?;
        Ok(BlobWriter {
            file: Some(File::from_std(std_file)),
            scratch,
            final_path: self.blob_path(entity_id),
        })
    }

    pub async fn open_reader(&self, entity_id: &EntityId) -> MosResult<File> {
        OpenOptions::new()
            .read(true)
            .open(self.blob_path(entity_id))
            .await
            .map_err(|e| self.map_io_err(entity_id, e))
    }

    /// Open a reader positioned at `offset`. Offsets past the end of the
    /// blob are rejected rather than yielding an empty stream.
    pub async fn open_reader_at(&self, entity_id: &EntityId, offset: u64) -> MosResult<File> {
        let mut file = self.open_reader(entity_id).await?;
        if offset > 0 {
            let meta = file
                .metadata()
                .await
                .map_err(|e| self.map_io_err(entity_id, e))?;
            if offset > meta.len() {
                return Err(MosError::InvalidParam(format!(
                    "offset {} beyond blob {} of {} bytes",
                    offset,
                    entity_id,
                    meta.len()
                )));
            }
            file.seek(SeekFrom::Start(offset)).await.map_err(|e| {
                warn!("BlobStore: seek blob {} failed! {}", entity_id, e);
                MosError::IoError(e.to_string())
            })?;
        }
        Ok(file)
    }

    pub async fn read_to_bytes(&self, entity_id: &EntityId) -> MosResult<Vec<u8>> {
        fs::read(self.blob_path(entity_id))
            .await
            .map_err(|e| self.map_io_err(entity_id, e))
    }

    pub async fn exists(&self, entity_id: &EntityId) -> MosResult<bool> {
        match fs::metadata(self.blob_path(entity_id)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.map_io_err(entity_id, e)),
        }
    }

    pub async fn remove(&self, entity_id: &EntityId) -> MosResult<()> {
        fs::remove_file(self.blob_path(entity_id))
            .await
            .map_err(|e| self.map_io_err(entity_id, e))
    }

    /// Remove a staged scratch file left behind by a failed writer. Missing
    /// scratch is not an error.
    pub async fn remove_scratch(&self, entity_id: &EntityId) -> MosResult<()> {
        match fs::remove_file(self.scratch_path(entity_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.map_io_err(entity_id, e)),
        }
    }

    /// Names of every entry under `main/`, scratch files included.
    pub async fn list_ids(&self) -> MosResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.main_dir)
            .await
            .map_err(|e| MosError::IoError(e.to_string()))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MosError::IoError(e.to_string()))?
        {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }
}

/// Chunked writer over one staged blob. `close` commits the scratch file to
/// its final name; `abort` discards it.
pub struct BlobWriter {
    file: Option<File>,
    scratch: PathBuf,
    final_path: PathBuf,
}

impl BlobWriter {
    fn closed_err() -> MosError {
        MosError::InvalidState("blob writer closed".to_string())
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    pub async fn write(&mut self, chunk: &[u8]) -> MosResult<()> {
        let file = self.file.as_mut().ok_or_else(Self::closed_err)?;
        file.write_all(chunk).await.map_err(|e| {
            warn!("BlobWriter: write failed! {}", e);
            MosError::IoError(e.to_string())
        })
    }

    pub async fn close(&mut self) -> MosResult<()> {
        let mut file = self.file.take().ok_or_else(Self::closed_err)?;
        file.flush().await.map_err(|e| {
            warn!("BlobWriter: flush failed! {}", e);
            MosError::IoError(e.to_string())
        })?;
        file.sync_all().await.map_err(|e| {
            warn!("BlobWriter: sync failed! {}", e);
            MosError::IoError(e.to_string())
        })?;
        // Dropping the handle releases the scratch lock before the swap.
        drop(file);
        fs::rename(&self.scratch, &self.final_path)
            .await
            .map_err(|e| {
                warn!("BlobWriter: commit rename failed! {}", e);
                MosError::IoError(e.to_string())
            })
    }

    pub async fn abort(&mut self) -> MosResult<()> {
        let file = self.file.take().ok_or_else(Self::closed_err)?;
        drop(file);
        match fs::remove_file(&self.scratch).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("BlobWriter: remove scratch failed! {}", e);
                Err(MosError::IoError(e.to_string()))
            }
        }
    }
}
