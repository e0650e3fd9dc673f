use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{MosError, MosResult};

const READ_BUF_SIZE: usize = 64 * 1024;

/// Incremental MD5 over streamed content. `finalize` yields the 32-char
/// lowercase hex digest and resets the hasher.
pub struct Md5Hasher {
    ctx: md5::Context,
}

impl Md5Hasher {
    pub fn new() -> Self {
        Self {
            ctx: md5::Context::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.ctx.consume(data);
    }

    pub fn finalize(&mut self) -> String {
        let ctx = std::mem::replace(&mut self.ctx, md5::Context::new());
        format!("{:x}", ctx.compute())
    }

    pub fn calc_from_bytes(data: &[u8]) -> String {
        format!("{:x}", md5::compute(data))
    }

    pub async fn calc_from_reader<R>(reader: &mut R) -> MosResult<(String, u64)>
    where
        R: AsyncRead + Unpin,
    {
        let mut hasher = Self::new();
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut total: u64 = 0;
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| MosError::IoError(e.to_string()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((hasher.finalize(), total))
    }
}

impl Default for Md5Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_digest() {
        assert_eq!(
            Md5Hasher::calc_from_bytes(b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut hasher = Md5Hasher::new();
        hasher.update(&data[..10]);
        hasher.update(&data[10..]);
        assert_eq!(hasher.finalize(), Md5Hasher::calc_from_bytes(data));
    }

    #[tokio::test]
    async fn test_calc_from_reader() {
        let data = vec![0xabu8; 200_000];
        let mut reader = std::io::Cursor::new(data.clone());
        let (digest, size) = Md5Hasher::calc_from_reader(&mut reader).await.unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(digest, Md5Hasher::calc_from_bytes(&data));
    }
}
