//! Storage Engine and Export Daemon Adapters
//!
//! - ZFS: datasets via the `zfs` CLI
//! - tgt: iSCSI targets via `tgt-admin`
//! - Memory: in-process fakes for tests and benchmarks

pub mod memory;
pub mod tgt;
pub mod zfs;

pub use memory::{DaemonCall, InMemoryEngine, RecordingDaemon};
pub use tgt::TgtAdmin;
pub use zfs::ZfsCli;
