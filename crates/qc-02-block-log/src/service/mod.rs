//! # Block Log Service
//!
//! File-backed implementation of the block log.
//!
//! ## Layers
//!
//! ```text
//! LogSetManager        parts, rotation, pruning, process lock
//!   └─ BlockRecordStore  one log file + compression
//!        ├─ BlockLogFile   framed, append-only bytes
//!        └─ ArtifactsIndex fixed-size records, regeneration
//! ```

mod api;
pub mod artifacts_index;
pub mod log_file;
pub mod log_set;
pub mod record_store;

pub use artifacts_index::{ArtifactsIndex, IndexTarget};
pub use log_file::{BlockLogFile, ScanOutcome, TailState};
pub use log_set::{LogPart, LogSetManager, LogSetState, OpenMode, PartInfo, PartSet};
pub use record_store::{
    BlockRecordStore, RawBlock, ReadPurpose, StoreDependencies, StoreOptions, VerifyReport,
};
