//! Versioning of the operations exposed by the codec contexts.
//!
//! Clients built against an older version of the operation tables keep working with a newer
//! library: they request the version they know, and discover optional features through
//! [`OpsCaps`] rather than by the size of the tables.
use bitflags::bitflags;

use crate::error::{VideoError, VideoResult};

/// Current version of the operation tables.
pub const OPS_VERSION: u32 = 1;

bitflags! {
    /// Optional features of a codec context.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct OpsCaps: u32 {
        /// Decoded picture buffers can be owned by the client.
        const DYNAMIC_DPB = 1 << 0;
        /// Stereo frame packing arrangement SEI can be read back.
        const FRAME_PACKING = 1 << 1;
        /// Encoding parameters can be pushed in bulk.
        const ENC_PARAM = 1 << 2;
        /// The input pool accepts extension enqueues.
        const EXTENSION_INPUT = 1 << 3;
        /// The output pool accepts extension enqueues.
        const EXTENSION_OUTPUT = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpsInfo {
    pub version: u32,
    pub capabilities: OpsCaps,
}

impl OpsInfo {
    pub fn new(capabilities: OpsCaps) -> Self {
        OpsInfo {
            version: OPS_VERSION,
            capabilities,
        }
    }

    pub fn supports(&self, caps: OpsCaps) -> bool {
        self.capabilities.contains(caps)
    }

    /// Check that a client expecting version `requested` of the tables can be served.
    pub fn check_version(&self, requested: u32) -> VideoResult<()> {
        if requested == 0 || requested > self.version {
            return Err(VideoError::BadParam("unsupported operation table version"));
        }
        Ok(())
    }
}

/// A codec context exposing versioned operations.
pub trait CodecOps {
    fn ops_info(&self) -> OpsInfo;
}
