//! peer-recovery - source side of shard peer recovery
//!
//! Streams a shard's data files and operation log to a node building a
//! new copy, and hands primary authority to a relocation target.

pub mod cluster;
pub mod observability;
pub mod recovery;
pub mod shard;
