//! The two directions of a codec's buffers.
//!
//! The names follow the codec's point of view: `Input` buffers are fed to the codec (the V4L2
//! `OUTPUT` queue), `Output` buffers are produced by it (the V4L2 `CAPTURE` queue).
use std::fmt::Debug;

use crate::QueueType;

/// Direction of a `BufferPool`.
pub trait Direction: Debug + Send + Sync + 'static {
    /// V4L2 queue backing pools of this direction.
    const QUEUE: QueueType;
    /// Value of the cacheable control enabling CPU caching of this direction's buffers.
    const CACHEABLE: i32;
}

/// Type for pools of buffers consumed by the codec.
#[derive(Debug)]
pub struct Input;
impl Direction for Input {
    const QUEUE: QueueType = QueueType::VideoOutputMplane;
    const CACHEABLE: i32 = 2;
}

/// Type for pools of buffers produced by the codec.
#[derive(Debug)]
pub struct Output;
impl Direction for Output {
    const QUEUE: QueueType = QueueType::VideoCaptureMplane;
    const CACHEABLE: i32 = 1;
}
