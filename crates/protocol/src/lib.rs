//! Coordination wire protocol: message types, content-type tagging, and
//! payload compression.
//!
//! Coordinators, workers, and humans exchange tagged JSON messages over the
//! deaddrop bus. This crate defines the message sum type, the codec
//! (serialize / deserialize with strict tag handling), and the transparent
//! gzip+base64 compression applied to large payloads.

pub mod compression;
pub mod content_type;
pub mod message;

pub use compression::{
    compress, decompress, estimate_compressed_size, Compression,
    DEFAULT_COMPRESSION_THRESHOLD,
};
pub use content_type::{
    compression_param, content_type_for, is_coordination, COORDINATION_CONTENT_TYPE,
    PEER_CONTENT_TYPE,
};
pub use message::{CoordinationMessage, Decision, TaskStatus};
