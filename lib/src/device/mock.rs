//! Scriptable stand-in for an MFC node, recording every call made to it.
use std::collections::{BTreeMap, VecDeque};
use std::ffi::CStr;
use std::sync::Mutex;

use nix::errno::Errno;
use nix::poll::PollFlags;

use super::MfcDevice;
use crate::ioctl::{
    self, BufferFlags, DqBufError, DqBufPlane, DqBuffer, ExtControl, ExtCtrlError, GCropError,
    GFmtError, MmapError, PlaneMapping, QBufError, QBuffer, QueryBufError, QueryBufPlane,
    QueryBuffer, ReqbufsError, SCtrlError, StreamOffError, StreamOnError,
};
use crate::memory::{shared_memory, MemoryType};
use crate::{Format, QueueType, Rect};

const PLANE_LENGTH: u32 = 4096;
const PLANES_PER_BUFFER: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Reqbufs(QueueType, MemoryType, u32),
    Querybuf(QueueType, u32),
    Qbuf(QueueType, QBuffer),
    Dqbuf(QueueType),
    StreamOn(QueueType),
    StreamOff(QueueType),
    SCtrl(u32, i32),
    GCtrl(u32),
    SExtCtrls(u32, Vec<ExtControl>),
    GExtCtrls(u32, Vec<u32>),
    SFmt(QueueType, Format),
    GFmt(QueueType),
    GCrop(QueueType),
    Poll(PollFlags),
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    granted: Option<u32>,
    fail_map_at: Option<u32>,
    qbuf_errors: VecDeque<Errno>,
    streamoff_error: Option<Errno>,
    queued: BTreeMap<QueueType, VecDeque<QBuffer>>,
    completions: BTreeMap<QueueType, VecDeque<DqBuffer>>,
    controls: BTreeMap<u32, i32>,
    formats: BTreeMap<QueueType, Format>,
    crop: Rect,
    polls: VecDeque<Result<PollFlags, Errno>>,
    before_dqbuf: Option<Box<dyn FnOnce() + Send>>,
}

/// Fake device. Queued buffers complete in order unless completions are scripted with
/// [`MockDevice::complete`].
#[derive(Default)]
pub struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Default::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count_calls<F: Fn(&Call) -> bool>(&self, f: F) -> usize {
        self.state().calls.iter().filter(|c| f(c)).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Make `VIDIOC_REQBUFS` grant `count` buffers regardless of the request.
    pub fn grant(&self, count: u32) {
        self.state().granted = Some(count);
    }

    /// Make mapping any plane of buffer `index` fail.
    pub fn fail_map_at(&self, index: u32) {
        self.state().fail_map_at = Some(index);
    }

    pub fn fail_next_qbuf(&self, errno: Errno) {
        self.state().qbuf_errors.push_back(errno);
    }

    pub fn fail_streamoff(&self, errno: Errno) {
        self.state().streamoff_error = Some(errno);
    }

    pub fn set_control(&self, id: u32, value: i32) {
        self.state().controls.insert(id, value);
    }

    pub fn control(&self, id: u32) -> Option<i32> {
        self.state().controls.get(&id).copied()
    }

    pub fn set_format(&self, queue: QueueType, format: Format) {
        self.state().formats.insert(queue, format);
    }

    pub fn set_crop(&self, crop: Rect) {
        self.state().crop = crop;
    }

    fn pop_completion(&self, queue: QueueType) -> Result<DqBuffer, DqBufError> {
        let mut state = self.state();
        state.calls.push(Call::Dqbuf(queue));
        if let Some(done) = state.completions.get_mut(&queue).and_then(|c| c.pop_front()) {
            return Ok(done);
        }
        match state.queued.get_mut(&queue).and_then(|q| q.pop_front()) {
            Some(buffer) => Ok(DqBuffer {
                index: buffer.index,
                flags: buffer.flags,
                sequence: 0,
                planes: buffer
                    .planes
                    .iter()
                    .map(|p| DqBufPlane {
                        bytesused: p.bytesused,
                        length: p.length,
                    })
                    .collect(),
            }),
            None => Err(DqBufError::NotReady),
        }
    }

    /// Run `f` once, right before the next `VIDIOC_DQBUF` returns and with no lock held.
    pub fn before_dqbuf<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.state().before_dqbuf = Some(Box::new(f));
    }

    pub fn push_poll(&self, result: Result<PollFlags, Errno>) {
        self.state().polls.push_back(result);
    }

    pub fn poll_count(&self) -> usize {
        self.count_calls(|c| matches!(c, Call::Poll(_)))
    }

    /// Indices of the buffers currently held by the device on `queue`.
    pub fn queued_indices(&self, queue: QueueType) -> Vec<u32> {
        self.state()
            .queued
            .get(&queue)
            .map(|q| q.iter().map(|b| b.index).collect())
            .unwrap_or_default()
    }

    /// Make buffer `index` of `queue` the next one to be dequeued.
    pub fn complete(&self, queue: QueueType, index: u32, bytesused: u32, flags: BufferFlags) {
        let mut state = self.state();
        if let Some(queued) = state.queued.get_mut(&queue) {
            queued.retain(|b| b.index != index);
        }
        state
            .completions
            .entry(queue)
            .or_default()
            .push_back(DqBuffer {
                index,
                flags,
                sequence: 0,
                planes: vec![DqBufPlane {
                    bytesused,
                    length: PLANE_LENGTH,
                }],
            });
    }
}

impl MfcDevice for MockDevice {
    fn reqbufs(
        &self,
        queue: QueueType,
        memory: MemoryType,
        count: u32,
    ) -> Result<u32, ReqbufsError> {
        let mut state = self.state();
        state.calls.push(Call::Reqbufs(queue, memory, count));
        if count == 0 {
            state.queued.remove(&queue);
            return Ok(0);
        }
        Ok(state.granted.unwrap_or(count))
    }

    fn querybuf(
        &self,
        queue: QueueType,
        _memory: MemoryType,
        index: u32,
    ) -> Result<QueryBuffer, QueryBufError> {
        self.state().calls.push(Call::Querybuf(queue, index));
        Ok(QueryBuffer {
            index,
            flags: BufferFlags::empty(),
            planes: (0..PLANES_PER_BUFFER as u32)
                .map(|plane| QueryBufPlane {
                    mem_offset: (index << 16) | (plane << 12),
                    length: PLANE_LENGTH,
                })
                .collect(),
        })
    }

    fn map_plane(&self, plane: &QueryBufPlane) -> Result<PlaneMapping, MmapError> {
        if self.state().fail_map_at == Some(plane.mem_offset >> 16) {
            return Err(MmapError::IoctlError(Errno::ENOMEM));
        }
        let name = CStr::from_bytes_with_nul(b"mock-plane\0").map_err(|_| Errno::EINVAL)?;
        let fd = shared_memory(name, plane.length as usize)?;
        ioctl::mmap(&fd, 0, plane.length)
    }

    fn qbuf(&self, queue: QueueType, buffer: &QBuffer) -> Result<(), QBufError> {
        let mut state = self.state();
        state.calls.push(Call::Qbuf(queue, buffer.clone()));
        if let Some(errno) = state.qbuf_errors.pop_front() {
            return Err(QBufError::IoctlError(errno));
        }
        state
            .queued
            .entry(queue)
            .or_default()
            .push_back(buffer.clone());
        Ok(())
    }

    fn dqbuf(
        &self,
        queue: QueueType,
        _memory: MemoryType,
        _num_planes: usize,
    ) -> Result<DqBuffer, DqBufError> {
        let result = self.pop_completion(queue);
        let hook = self.state().before_dqbuf.take();
        if let Some(hook) = hook {
            hook();
        }
        result
    }

    fn streamon(&self, queue: QueueType) -> Result<(), StreamOnError> {
        self.state().calls.push(Call::StreamOn(queue));
        Ok(())
    }

    fn streamoff(&self, queue: QueueType) -> Result<(), StreamOffError> {
        let mut state = self.state();
        state.calls.push(Call::StreamOff(queue));
        state.queued.remove(&queue);
        state.completions.remove(&queue);
        match state.streamoff_error.take() {
            Some(errno) => Err(StreamOffError::IoctlError(errno)),
            None => Ok(()),
        }
    }

    fn s_ctrl(&self, id: u32, value: i32) -> Result<(), SCtrlError> {
        let mut state = self.state();
        state.calls.push(Call::SCtrl(id, value));
        state.controls.insert(id, value);
        Ok(())
    }

    fn g_ctrl(&self, id: u32) -> Result<i32, SCtrlError> {
        let mut state = self.state();
        state.calls.push(Call::GCtrl(id));
        state
            .controls
            .get(&id)
            .copied()
            .ok_or(SCtrlError::InvalidId)
    }

    fn s_ext_ctrls(&self, ctrl_class: u32, ctrls: &mut [ExtControl]) -> Result<(), ExtCtrlError> {
        let mut state = self.state();
        state.calls.push(Call::SExtCtrls(ctrl_class, ctrls.to_vec()));
        for ctrl in ctrls.iter() {
            state.controls.insert(ctrl.id, ctrl.value);
        }
        Ok(())
    }

    fn g_ext_ctrls(&self, ctrl_class: u32, ctrls: &mut [ExtControl]) -> Result<(), ExtCtrlError> {
        let mut state = self.state();
        state.calls.push(Call::GExtCtrls(
            ctrl_class,
            ctrls.iter().map(|c| c.id).collect(),
        ));
        for (i, ctrl) in ctrls.iter_mut().enumerate() {
            ctrl.value = *state
                .controls
                .get(&ctrl.id)
                .ok_or(ExtCtrlError::InvalidControl(i as u32))?;
        }
        Ok(())
    }

    fn s_fmt(&self, queue: QueueType, format: &Format) -> Result<Format, GFmtError> {
        let mut state = self.state();
        state.calls.push(Call::SFmt(queue, format.clone()));
        state.formats.insert(queue, format.clone());
        Ok(format.clone())
    }

    fn g_fmt(&self, queue: QueueType) -> Result<Format, GFmtError> {
        let mut state = self.state();
        state.calls.push(Call::GFmt(queue));
        state
            .formats
            .get(&queue)
            .cloned()
            .ok_or(GFmtError::InvalidBufferType)
    }

    fn g_crop(&self, queue: QueueType) -> Result<Rect, GCropError> {
        let mut state = self.state();
        state.calls.push(Call::GCrop(queue));
        Ok(state.crop)
    }

    fn poll(&self, events: PollFlags, _timeout_ms: i32) -> Result<PollFlags, Errno> {
        let mut state = self.state();
        state.calls.push(Call::Poll(events));
        state
            .polls
            .pop_front()
            .unwrap_or(Ok(PollFlags::POLLIN | PollFlags::POLLOUT))
    }
}
