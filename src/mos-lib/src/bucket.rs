use serde::{Deserialize, Serialize};

use crate::{MosError, MosResult};

pub const MAX_BUCKET_NAME_LEN: usize = 63;

/// A validated bucket name: 1-63 chars of `[a-z0-9._-]`, starting and
/// ending with an alphanumeric character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BucketName(String);

impl BucketName {
    pub fn parse(name: &str) -> MosResult<Self> {
        if name.is_empty() || name.len() > MAX_BUCKET_NAME_LEN {
            return Err(MosError::InvalidBucketName(name.to_string()));
        }
        let bytes = name.as_bytes();
        let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
        if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
            return Err(MosError::InvalidBucketName(name.to_string()));
        }
        if !bytes
            .iter()
            .all(|&b| alnum(b) || b == b'.' || b == b'_' || b == b'-')
        {
            return Err(MosError::InvalidBucketName(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BucketName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for BucketName {
    type Error = MosError;

    fn try_from(value: String) -> MosResult<Self> {
        Self::parse(&value)
    }
}

impl From<BucketName> for String {
    fn from(name: BucketName) -> Self {
        name.0
    }
}
