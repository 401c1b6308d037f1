use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a markup file, derived from its path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(u32);

impl FileId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Generate file ID from file path using CRC32
pub fn get_file_id(path: &str) -> FileId {
    let mut buff = String::from(path);
    if !path.contains("://") {
        buff = format!("file://{}", buff);
    }

    let mut hasher = Hasher::new();
    hasher.update(buff.as_bytes());
    FileId(hasher.finalize())
}

/// Sequential path generator for scratch files that never touch disk
#[derive(Debug, Clone, Default)]
pub struct ScratchPaths {
    count: u32,
}

impl ScratchPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate next scratch path
    pub fn next_path(&mut self, kind: &str) -> String {
        self.count += 1;
        format!("mock://{}/{}", kind, self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_generation() {
        let id1 = get_file_id("/project.xml");
        let id2 = get_file_id("/project.xml");

        // Same path always generates same ID
        assert_eq!(id1, id2);

        // Explicit scheme is hashed the same way
        assert_eq!(id1, get_file_id("file:///project.xml"));

        // Different paths generate different IDs
        let id3 = get_file_id("/module.xml");
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_scratch_paths_are_sequential() {
        let mut paths = ScratchPaths::new();

        let p1 = paths.next_path("Project");
        let p2 = paths.next_path("Project");

        assert_eq!(p1, "mock://Project/1");
        assert_eq!(p2, "mock://Project/2");
        assert_ne!(get_file_id(&p1), get_file_id(&p2));
    }
}
