//! ndbsig-core — the segmented-section arena and the wire types of the
//! fragment protocol. All other ndbsig crates depend on this one.

pub mod config;
pub mod error;
pub mod pool;
pub mod properties;
pub mod reader;
pub mod section;
pub mod wire;
pub mod writer;

pub use config::NdbsigConfig;
pub use error::{fatal, InvariantViolation, PoolError, SectionError};
pub use pool::{PoolStats, SegmentId, SegmentPool, DATA_LENGTH};
pub use properties::{PropertiesReader, PropertyError, PropertyValue};
pub use reader::{ReaderPos, SectionReader, WordRun};
pub use section::{segments_for, Section, SectionView};
pub use wire::{BlockRef, FragInfo, NodeBitmask, NodeId, Priority, ReceiverGroup, RNIL};
pub use writer::SectionWriter;
