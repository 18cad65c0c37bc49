//! Point-in-time data snapshot of a shard.

use bytes::Bytes;

/// One data file in a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFile {
    /// File name, unique within the snapshot
    pub name: String,
    /// File contents
    pub data: Bytes,
}

impl StoreFile {
    /// Create a store file.
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// File length in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Check if the file is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Consistent snapshot of a shard's data files
#[derive(Debug, Clone, Default)]
pub struct DataSnapshot {
    /// Files making up the snapshot
    pub files: Vec<StoreFile>,
    /// Highest sequence number contained in the snapshot, `None` if no
    /// operation has been applied yet
    pub max_seq_no: Option<u64>,
}

impl DataSnapshot {
    /// Create a snapshot.
    pub fn new(files: Vec<StoreFile>, max_seq_no: Option<u64>) -> Self {
        Self { files, max_seq_no }
    }

    /// Total size of all files.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(StoreFile::len).sum()
    }

    /// First op-log position not covered by the snapshot.
    pub fn next_seq_no(&self) -> u64 {
        self.max_seq_no.map_or(0, |s| s.saturating_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_bytes() {
        let snapshot = DataSnapshot::new(
            vec![StoreFile::new("a", vec![0u8; 10]), StoreFile::new("b", vec![0u8; 5])],
            Some(7),
        );
        assert_eq!(snapshot.total_bytes(), 15);
        assert_eq!(snapshot.next_seq_no(), 8);
    }

    #[test]
    fn test_empty_snapshot_starts_at_zero() {
        assert_eq!(DataSnapshot::default().next_seq_no(), 0);
    }

    #[test]
    fn test_next_seq_no_saturates() {
        let snapshot = DataSnapshot::new(Vec::new(), Some(u64::MAX));
        assert_eq!(snapshot.next_seq_no(), u64::MAX);
    }
}
