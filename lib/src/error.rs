//! Error type shared by all the codec operations.
use nix::errno::Errno;
use thiserror::Error;

use crate::ioctl::{
    DqBufError, ExtCtrlError, GCropError, GFmtError, MmapError, QBufError, QueryBufError,
    QueryCapError, ReqbufsError, SCtrlError, StreamOffError, StreamOnError,
};

/// Result of a codec operation.
///
/// Every variant maps to a stable negative code through [`VideoError::code`], which is what the C
/// operation tables return.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("bad parameter: {0}")]
    BadParam(&'static str),
    #[error("failed to initialize device: {0}")]
    Init(String),
    #[error("requested {requested} buffers, device granted {granted}")]
    NoMem { requested: u32, granted: u32 },
    #[error("device call failed: {0}")]
    ApiFail(Errno),
    #[error("failed to map plane: {0}")]
    MapFail(Errno),
    #[error("no buffer available")]
    NoBuffers,
    #[error("poll failed: {0}")]
    Poll(Errno),
    #[error("buffer size does not match the stream resolution")]
    WrongBufferSize,
}

impl VideoError {
    /// Code of the error on the C boundary. Success is reported as `0` there.
    pub fn code(&self) -> i32 {
        match self {
            VideoError::BadParam(_) => -1,
            VideoError::Init(_) => -2,
            VideoError::NoMem { .. } => -3,
            VideoError::ApiFail(_) => -4,
            VideoError::MapFail(_) => -5,
            VideoError::NoBuffers => -6,
            VideoError::Poll(_) => -7,
            VideoError::WrongBufferSize => -8,
        }
    }
}

pub type VideoResult<T> = Result<T, VideoError>;

macro_rules! impl_api_fail {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for VideoError {
                fn from(err: $err) -> Self {
                    VideoError::ApiFail(err.into())
                }
            }
        )*
    };
}

impl_api_fail!(
    DqBufError,
    ExtCtrlError,
    GCropError,
    GFmtError,
    QBufError,
    QueryBufError,
    ReqbufsError,
    SCtrlError,
    StreamOffError,
    StreamOnError,
);

impl From<MmapError> for VideoError {
    fn from(err: MmapError) -> Self {
        VideoError::MapFail(err.into())
    }
}

impl From<QueryCapError> for VideoError {
    fn from(err: QueryCapError) -> Self {
        VideoError::Init(err.to_string())
    }
}
