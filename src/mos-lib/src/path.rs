use serde::{Deserialize, Serialize};

use crate::{MosError, MosResult};

/// Upper bound on the UTF-8 byte length of a full path.
pub const MAX_PATH_BYTES: usize = 1024;

/// A bucket-relative file path, split on `/` into segments.
///
/// The empty string is a valid path with the single segment `""`. Joining
/// `segments` with `/` always reproduces `fullpath`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FilePath {
    fullpath: String,
    segments: Vec<String>,
}

impl FilePath {
    pub fn parse(path: &str) -> MosResult<Self> {
        if path.len() > MAX_PATH_BYTES {
            return Err(MosError::InvalidPath(format!(
                "path too long: {} bytes",
                path.len()
            )));
        }
        let segments = path.split('/').map(str::to_string).collect();
        Ok(Self {
            fullpath: path.to_string(),
            segments,
        })
    }

    pub fn from_utf8(bytes: &[u8]) -> MosResult<Self> {
        if bytes.len() > MAX_PATH_BYTES {
            return Err(MosError::InvalidPath(format!(
                "path too long: {} bytes",
                bytes.len()
            )));
        }
        let path = std::str::from_utf8(bytes)
            .map_err(|e| MosError::InvalidPath(format!("malformed utf-8 path: {}", e)))?;
        Self::parse(path)
    }

    pub fn from_segments(segments: Vec<String>) -> MosResult<Self> {
        if segments.is_empty() {
            return Err(MosError::InvalidPath("empty segment list".to_string()));
        }
        let fullpath = segments.join("/");
        if fullpath.len() > MAX_PATH_BYTES {
            return Err(MosError::InvalidPath(format!(
                "path too long: {} bytes",
                fullpath.len()
            )));
        }
        Ok(Self { fullpath, segments })
    }

    pub fn fullpath(&self) -> &str {
        &self.fullpath
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// All segments except the last.
    pub fn dir_segments(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    pub fn dirname(&self) -> String {
        self.dir_segments().join("/")
    }

    pub fn basename(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// Basename minus the extension. Dot-prefixed names like `.bashrc` are
    /// treated as a filename with no extension.
    pub fn filename(&self) -> &str {
        self.split_ext().0
    }

    /// The extension including the leading dot, or the empty string.
    pub fn extname(&self) -> &str {
        self.split_ext().1
    }

    fn split_ext(&self) -> (&str, &str) {
        let base = self.basename();
        match base.rfind('.') {
            Some(pos) if pos > 0 => (&base[..pos], &base[pos..]),
            _ => (base, ""),
        }
    }
}

impl std::fmt::Display for FilePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.fullpath)
    }
}

impl TryFrom<String> for FilePath {
    type Error = MosError;

    fn try_from(value: String) -> MosResult<Self> {
        Self::parse(&value)
    }
}

impl From<FilePath> for String {
    fn from(path: FilePath) -> Self {
        path.fullpath
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for p in ["", "file.txt", "a/b/c.txt", "a//b", "/leading", "trailing/"] {
            let parsed = FilePath::parse(p).unwrap();
            assert_eq!(parsed.fullpath(), p);
            assert_eq!(parsed.segments().join("/"), p);
        }
    }

    #[test]
    fn test_segments() {
        let p = FilePath::parse("a/b/c.txt").unwrap();
        assert_eq!(p.segments(), &["a", "b", "c.txt"]);
        assert_eq!(p.dir_segments(), &["a", "b"]);
        assert_eq!(p.dirname(), "a/b");
        assert_eq!(p.basename(), "c.txt");

        let empty = FilePath::parse("").unwrap();
        assert_eq!(empty.segments(), &[""]);
        assert_eq!(empty.basename(), "");
        assert_eq!(empty.dirname(), "");
    }

    #[test]
    fn test_filename_and_extname() {
        let p = FilePath::parse("docs/report.final.pdf").unwrap();
        assert_eq!(p.filename(), "report.final");
        assert_eq!(p.extname(), ".pdf");

        let dotfile = FilePath::parse("home/.bashrc").unwrap();
        assert_eq!(dotfile.filename(), ".bashrc");
        assert_eq!(dotfile.extname(), "");

        let plain = FilePath::parse("Makefile").unwrap();
        assert_eq!(plain.filename(), "Makefile");
        assert_eq!(plain.extname(), "");
    }

    #[test]
    fn test_length_bounds() {
        let max = "x".repeat(MAX_PATH_BYTES);
        assert!(FilePath::parse(&max).is_ok());

        let over = "x".repeat(MAX_PATH_BYTES + 1);
        let err = FilePath::parse(&over).unwrap_err();
        assert!(matches!(err, MosError::InvalidPath(_)));
    }

    #[test]
    fn test_from_utf8() {
        let p = FilePath::from_utf8("a/b.txt".as_bytes()).unwrap();
        assert_eq!(p.fullpath(), "a/b.txt");

        let err = FilePath::from_utf8(&[0x66, 0xff, 0x66]).unwrap_err();
        assert!(matches!(err, MosError::InvalidPath(_)));
    }

    #[test]
    fn test_from_segments() {
        let p = FilePath::from_segments(vec!["a".to_string(), "b.txt".to_string()]).unwrap();
        assert_eq!(p.fullpath(), "a/b.txt");
        assert!(FilePath::from_segments(Vec::new()).is_err());
    }
}
