//! Buffer pools backing the two queues of a codec.
//!
//! A [`BufferPool`] manages the buffers of one direction of a codec: their allocation, the memory
//! attached to them, their hand-over to and from the driver, and the streaming state of the
//! underlying V4L2 queue.
//!
//! The state of a pool is protected by its own mutex. The two pools of a codec never take each
//! other's lock, so one thread can feed the codec while another one collects its output. Buffers
//! are marked as queued before the lock is released to call `VIDIOC_QBUF`, so two concurrent
//! enqueues cannot submit the same buffer; a failed submission rolls the buffer back.
pub mod buffer;
pub mod direction;
pub mod slots;

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, trace, warn};
use nix::errno::Errno;

use crate::device::poller;
use crate::device::MfcDevice;
use crate::dpb::{ReleaseEntry, ReleaseTable, VIDEO_BUFFER_MAX_NUM};
use crate::error::{VideoError, VideoResult};
use crate::format::Geometry;
use crate::ioctl::{BufferFlags, DqBuffer, PlaneBacking, QBufPlane, QBuffer};
use crate::memory::{MemoryType, PlaneMemory, PlaneSource};
use buffer::{Buffer, BufferInfo, Plane};
use direction::Direction;
use slots::SlotTable;

/// Processing of a just dequeued buffer, run under the pool's lock.
pub type DequeueHook<Dev> = fn(&Dev, &mut Buffer, &DqBuffer);
/// Translation of the error of a refused extension enqueue into the error reported to clients.
pub type QbufErrorHook<Dev> = fn(&Dev, VideoError) -> VideoError;

/// Static parameters of a pool.
pub struct PoolConfig<Dev> {
    /// Number of planes of each buffer.
    pub num_planes: usize,
    /// Number of buffers to allocate when setup is called with a count of 0. Setup fails with
    /// a count of 0 if unset.
    pub default_count: Option<u32>,
    /// Kind of memory clients provide when the pool is shared.
    pub memory: MemoryType,
    /// Track references of the driver to the buffers (dynamic DPB).
    pub track_references: bool,
    pub poll_timeout_ms: i32,
    /// Give up waiting after this many consecutive poll timeouts.
    pub max_poll_timeouts: Option<u32>,
    pub on_dequeue: Option<DequeueHook<Dev>>,
    pub on_extension_qbuf_error: Option<QbufErrorHook<Dev>>,
}

impl<Dev> PoolConfig<Dev> {
    pub fn new(num_planes: usize, memory: MemoryType) -> Self {
        PoolConfig {
            num_planes,
            default_count: None,
            memory,
            track_references: false,
            poll_timeout_ms: -1,
            max_poll_timeouts: None,
            on_dequeue: None,
            on_extension_qbuf_error: None,
        }
    }

    pub fn default_count(self, count: u32) -> Self {
        PoolConfig {
            default_count: Some(count),
            ..self
        }
    }

    pub fn track_references(self) -> Self {
        PoolConfig {
            track_references: true,
            ..self
        }
    }

    pub fn poll_timeout(self, timeout_ms: i32, max_timeouts: Option<u32>) -> Self {
        PoolConfig {
            poll_timeout_ms: timeout_ms,
            max_poll_timeouts: max_timeouts,
            ..self
        }
    }

    pub fn on_dequeue(self, hook: DequeueHook<Dev>) -> Self {
        PoolConfig {
            on_dequeue: Some(hook),
            ..self
        }
    }

    pub fn on_extension_qbuf_error(self, hook: QbufErrorHook<Dev>) -> Self {
        PoolConfig {
            on_extension_qbuf_error: Some(hook),
            ..self
        }
    }
}

/// A buffer returned by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// State of the buffer right after it was dequeued.
    pub buffer: BufferInfo,
    pub flags: BufferFlags,
    pub sequence: u32,
    /// Release descriptor of the buffer, for extension dequeues on pools tracking references.
    pub release: Option<ReleaseEntry>,
}

impl DequeuedBuffer {
    fn new(buffer: &Buffer, dqbuf: &DqBuffer) -> Self {
        DequeuedBuffer {
            buffer: buffer.info(),
            flags: dqbuf.flags,
            sequence: dqbuf.sequence,
            release: None,
        }
    }

    pub fn index(&self) -> usize {
        self.buffer.index
    }

    pub fn is_last(&self) -> bool {
        self.flags.contains(BufferFlags::LAST)
    }
}

#[derive(Default)]
struct PoolState {
    /// Memory is provided by clients rather than allocated by the driver.
    shared: bool,
    streaming: bool,
    /// Memory type the buffers were allocated with.
    memory: MemoryType,
    slots: Option<SlotTable>,
    geometry: Geometry,
    release_table: Option<ReleaseTable>,
}

/// The buffers of one direction of a codec.
pub struct BufferPool<D: Direction, Dev: MfcDevice> {
    device: Arc<Dev>,
    config: PoolConfig<Dev>,
    state: Mutex<PoolState>,
    _d: PhantomData<D>,
}

impl<D: Direction, Dev: MfcDevice> BufferPool<D, Dev> {
    pub fn new(device: Arc<Dev>, config: PoolConfig<Dev>) -> Self {
        BufferPool {
            device,
            config,
            state: Default::default(),
            _d: PhantomData,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn num_planes(&self) -> usize {
        self.config.num_planes
    }

    pub fn num_buffers(&self) -> usize {
        self.lock().slots.as_ref().map_or(0, SlotTable::len)
    }

    pub fn is_configured(&self) -> bool {
        self.lock().slots.is_some()
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    pub fn is_shared(&self) -> bool {
        self.lock().shared
    }

    /// Make the pool use client-provided memory instead of allocating its own. Must be called
    /// before `setup`.
    pub fn set_shareable(&self, shared: bool) -> VideoResult<()> {
        let mut state = self.lock();
        if state.slots.is_some() {
            return Err(VideoError::BadParam(
                "cannot change memory ownership of a configured pool",
            ));
        }
        state.shared = shared;

        Ok(())
    }

    /// Enable CPU caching of the buffers of this direction.
    pub fn enable_cacheable(&self) -> VideoResult<()> {
        self.device.s_ctrl(crate::bindings::V4L2_CID_CACHEABLE, D::CACHEABLE)?;
        Ok(())
    }

    pub fn geometry(&self) -> Geometry {
        self.lock().geometry
    }

    pub(crate) fn set_geometry(&self, geometry: Geometry) {
        self.lock().geometry = geometry;
    }

    /// Attach the table the driver reports released references through.
    pub(crate) fn attach_release_table(&self, table: ReleaseTable) {
        self.lock().release_table = Some(table);
    }

    /// Run `f` on the release table, if one is attached.
    pub fn with_release_table<R, F: FnOnce(&mut ReleaseTable) -> R>(&self, f: F) -> Option<R> {
        self.lock().release_table.as_mut().map(f)
    }

    /// Allocate `count` buffers, or the pool's default number if `count` is 0.
    ///
    /// If the pool is not shared, the buffers are allocated by the driver and mapped. Fails with
    /// `NoMem` if the driver cannot provide exactly the requested number of buffers.
    pub fn setup(&self, count: u32) -> VideoResult<()> {
        let count = match (count, self.config.default_count) {
            (0, Some(default)) => default,
            (0, None) => return Err(VideoError::BadParam("buffer count cannot be 0")),
            (count, _) => count,
        };
        if count as usize > VIDEO_BUFFER_MAX_NUM {
            return Err(VideoError::BadParam("too many buffers requested"));
        }

        let mut state = self.lock();
        if state.streaming {
            return Err(VideoError::BadParam("cannot set up a streaming pool"));
        }
        if state.slots.is_some() {
            return Err(VideoError::BadParam("pool is already set up"));
        }

        let memory = self.allocation_memory(state.shared);
        let granted = self.device.reqbufs(D::QUEUE, memory, count)?;
        if granted != count {
            error!(
                "Requested {} buffers on {} queue, obtained {}",
                count,
                D::QUEUE,
                granted
            );
            self.free_buffers(memory);
            return Err(VideoError::NoMem {
                requested: count,
                granted,
            });
        }

        let mut buffers = Vec::with_capacity(count as usize);
        for index in 0..count {
            let planes = if state.shared {
                (0..self.config.num_planes).map(|_| Plane::default()).collect()
            } else {
                match self.map_buffer(index) {
                    Ok(planes) => planes,
                    Err(e) => {
                        drop(buffers);
                        self.free_buffers(memory);
                        return Err(e);
                    }
                }
            };
            buffers.push(Buffer::new(index as usize, planes, !state.shared));
        }

        debug!(
            "Allocated {} {} buffers on {} queue",
            count,
            if state.shared { "shared" } else { "mapped" },
            D::QUEUE
        );
        state.memory = memory;
        state.slots = Some(SlotTable::new(buffers, self.config.track_references));

        Ok(())
    }

    fn allocation_memory(&self, shared: bool) -> MemoryType {
        if shared {
            self.config.memory
        } else {
            MemoryType::Mmap
        }
    }

    /// Give back to the driver buffers that could not be set up. Must be called with no plane
    /// mapped.
    fn free_buffers(&self, memory: MemoryType) {
        if let Err(e) = self.device.reqbufs(D::QUEUE, memory, 0) {
            warn!("Failed to free {} queue buffers: {}", D::QUEUE, e);
        }
    }

    fn map_buffer(&self, index: u32) -> VideoResult<Vec<Plane>> {
        let querybuf = self.device.querybuf(D::QUEUE, MemoryType::Mmap, index)?;
        if querybuf.planes.len() < self.config.num_planes {
            error!(
                "Buffer {} of {} queue has {} planes, expected {}",
                index,
                D::QUEUE,
                querybuf.planes.len(),
                self.config.num_planes
            );
            return Err(VideoError::MapFail(Errno::EINVAL));
        }

        querybuf
            .planes
            .iter()
            .take(self.config.num_planes)
            .map(|plane| {
                let mapping = self.device.map_plane(plane).map_err(|e| {
                    error!("Cannot map plane of buffer {}: {}", index, e);
                    e
                })?;
                Ok(Plane::new(PlaneMemory::Mapped(mapping), plane.length))
            })
            .collect()
    }

    /// Start streaming. Does nothing if the pool is already streaming.
    pub fn run(&self) -> VideoResult<()> {
        let mut state = self.lock();
        if !state.streaming {
            self.device.streamon(D::QUEUE)?;
            state.streaming = true;
            debug!("{} queue streaming", D::QUEUE);
        }

        Ok(())
    }

    /// Stop streaming. All the buffers return to the pool, even if the driver reports an error.
    pub fn stop(&self) -> VideoResult<()> {
        let mut state = self.lock();
        let result = if state.streaming {
            state.streaming = false;
            debug!("{} queue stopped", D::QUEUE);
            self.device.streamoff(D::QUEUE).map_err(VideoError::from)
        } else {
            Ok(())
        };
        if let Some(slots) = state.slots.as_mut() {
            slots.reset();
        }

        result
    }

    /// Index of the first non-queued buffer matching `plane`, or of any non-queued buffer if
    /// `plane` does not identify one.
    pub fn find(&self, plane: &PlaneSource) -> Option<usize> {
        self.lock()
            .slots
            .as_ref()
            .and_then(|slots| slots.find_by_key(plane.key()))
    }

    fn check_planes(&self, planes: &[PlaneSource]) -> VideoResult<()> {
        if planes.len() > self.config.num_planes {
            return Err(VideoError::BadParam("too many planes"));
        }
        Ok(())
    }

    /// Queue the buffer designated by the first of `planes`, with the given amount of data in
    /// each plane. For shared pools, the buffer must have been registered first.
    ///
    /// Returns the index of the queued buffer.
    pub fn enqueue(
        &self,
        planes: &[PlaneSource],
        tag: Option<usize>,
        flags: BufferFlags,
    ) -> VideoResult<usize> {
        self.check_planes(planes)?;

        let qbuffer = {
            let mut state = self.lock();
            let memory = state.memory;
            let slots = state
                .slots
                .as_mut()
                .ok_or(VideoError::BadParam("pool is not set up"))?;
            let key = planes.first().and_then(PlaneSource::key);
            let index = slots.find_by_key(key).ok_or_else(|| {
                warn!("No free {} buffer matching {:?}", D::QUEUE, key);
                VideoError::NoBuffers
            })?;

            let buffer = slots
                .get_mut(index)
                .ok_or(VideoError::BadParam("buffer index out of range"))?;
            let mut qplanes = Vec::with_capacity(buffer.planes.len());
            for (i, plane) in buffer.planes.iter_mut().enumerate() {
                let source = planes.get(i).copied().unwrap_or_default();
                if !plane.fits(source.data_size) {
                    return Err(VideoError::BadParam("data larger than plane"));
                }
                plane.used_size = source.data_size;
                qplanes.push(QBufPlane {
                    bytesused: source.data_size,
                    length: if plane.allocated_size > 0 {
                        plane.allocated_size
                    } else {
                        source.alloc_size
                    },
                    backing: match memory {
                        MemoryType::Mmap => PlaneBacking::Mmap,
                        MemoryType::UserPtr => PlaneBacking::UserPtr(
                            plane.memory.address().or(source.addr).unwrap_or(0),
                        ),
                        MemoryType::DmaBuf => {
                            PlaneBacking::DmaBuf(plane.memory.fd().or(source.fd).unwrap_or(-1))
                        }
                    },
                });
            }
            slots.mark_queued(index, tag)?;

            QBuffer {
                index: index as u32,
                memory,
                flags,
                planes: qplanes,
            }
        };

        if let Err(e) = self.device.qbuf(D::QUEUE, &qbuffer) {
            error!("Failed to queue {} buffer {}: {}", D::QUEUE, qbuffer.index, e);
            if let Some(slots) = self.lock().slots.as_mut() {
                slots.rollback(qbuffer.index as usize, false);
            }
            return Err(e.into());
        }
        trace!("Queued {} buffer {}", D::QUEUE, qbuffer.index);

        Ok(qbuffer.index as usize)
    }

    /// Queue every buffer of the pool that is not queued yet, without data.
    pub fn enqueue_all(&self) -> VideoResult<()> {
        for _ in 0..self.num_buffers() {
            match self.enqueue(&[], None, BufferFlags::empty()) {
                Ok(_) => (),
                Err(VideoError::NoBuffers) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Queue a buffer of a shared pool, attaching the memory described by `planes` to it.
    ///
    /// The buffer already bound to the first plane is reused if it is not queued, otherwise any
    /// free slot is picked. On pools tracking references, the buffer gains one reference.
    pub fn enqueue_extension(
        &self,
        planes: &[PlaneSource],
        tag: Option<usize>,
    ) -> VideoResult<usize> {
        self.check_planes(planes)?;
        if planes.is_empty() {
            return Err(VideoError::BadParam("no plane given"));
        }

        let qbuffer = {
            let mut state = self.lock();
            if !state.shared {
                return Err(VideoError::BadParam("pool does not use client memory"));
            }
            let memory = state.memory;
            let slots = state
                .slots
                .as_mut()
                .ok_or(VideoError::BadParam("pool is not set up"))?;
            let index = slots
                .find_by_key(planes[0].key())
                .or_else(|| slots.acquire_free_slot())
                .ok_or_else(|| {
                    warn!("No free {} slot", D::QUEUE);
                    VideoError::NoBuffers
                })?;
            slots.mark_queued(index, tag)?;
            slots.acquire_reference(index)?;

            let buffer = slots
                .get_mut(index)
                .ok_or(VideoError::BadParam("buffer index out of range"))?;
            for (plane, source) in buffer.planes.iter_mut().zip(planes) {
                *plane = Plane {
                    memory: PlaneMemory::imported(memory, source.addr, source.fd),
                    allocated_size: source.alloc_size,
                    used_size: source.data_size,
                };
            }
            // Planes the caller did not provide must not keep memory from an earlier frame.
            for plane in buffer.planes.iter_mut().skip(planes.len()) {
                *plane = Plane::default();
            }
            buffer.registered = true;

            QBuffer {
                index: index as u32,
                memory,
                flags: BufferFlags::empty(),
                planes: planes
                    .iter()
                    .map(|source| QBufPlane {
                        bytesused: source.data_size,
                        length: source.alloc_size,
                        backing: match memory {
                            MemoryType::DmaBuf => PlaneBacking::DmaBuf(source.fd.unwrap_or(-1)),
                            MemoryType::UserPtr => {
                                PlaneBacking::UserPtr(source.addr.unwrap_or(0))
                            }
                            MemoryType::Mmap => PlaneBacking::Mmap,
                        },
                    })
                    .collect(),
            }
        };

        if let Err(e) = self.device.qbuf(D::QUEUE, &qbuffer) {
            error!(
                "Failed to queue {} buffer {} in extension mode: {}",
                D::QUEUE,
                qbuffer.index,
                e
            );
            if let Some(slots) = self.lock().slots.as_mut() {
                slots.rollback(qbuffer.index as usize, true);
            }
            let err = VideoError::from(e);
            return Err(match self.config.on_extension_qbuf_error {
                Some(hook) => hook(&self.device, err),
                None => err,
            });
        }
        trace!("Queued {} buffer {} (extension)", D::QUEUE, qbuffer.index);

        Ok(qbuffer.index as usize)
    }

    fn dqbuf(&self) -> Result<DqBuffer, crate::ioctl::DqBufError> {
        let memory = self.lock().memory;
        self.device.dqbuf(D::QUEUE, memory, self.config.num_planes)
    }

    /// Take back a buffer from the driver.
    ///
    /// Returns `None` if the pool is not streaming, or if no buffer could be dequeued.
    pub fn dequeue(&self) -> Option<DequeuedBuffer> {
        if !self.is_streaming() {
            return None;
        }

        let dqbuf = match self.dqbuf() {
            Ok(dqbuf) => dqbuf,
            Err(e) => {
                debug!("No {} buffer dequeued: {}", D::QUEUE, e);
                return None;
            }
        };

        let mut state = self.lock();
        // The pool may have been stopped while we were waiting for the driver.
        if !state.streaming {
            return None;
        }
        let slots = state.slots.as_mut()?;
        let index = dqbuf.index as usize;
        if index >= slots.len() {
            error!("Driver returned invalid {} buffer {}", D::QUEUE, index);
            return None;
        }
        slots.release(index);
        let buffer = slots.get_mut(index)?;
        self.complete(buffer, &dqbuf);
        trace!("Dequeued {} buffer {}", D::QUEUE, index);

        Some(DequeuedBuffer::new(buffer, &dqbuf))
    }

    fn complete(&self, buffer: &mut Buffer, dqbuf: &DqBuffer) {
        for (plane, dqplane) in buffer.planes.iter_mut().zip(dqbuf.planes.iter()) {
            plane.used_size = if plane.allocated_size > 0 {
                dqplane.bytesused.min(plane.allocated_size)
            } else {
                dqplane.bytesused
            };
        }
        if let Some(hook) = self.config.on_dequeue {
            hook(&self.device, buffer, dqbuf);
        }
    }

    /// Take back a buffer queued with `enqueue_extension`.
    ///
    /// On pools tracking references, the release descriptor of the buffer is consumed: the
    /// buffers the driver stopped referencing lose one reference, and a copy of the descriptor is
    /// returned along with the buffer. Returns `NoBuffers` if the dequeued buffer was not queued.
    pub fn dequeue_extension(&self) -> VideoResult<DequeuedBuffer> {
        if !self.is_streaming() {
            return Err(VideoError::ApiFail(Errno::EINVAL));
        }

        let dqbuf = self.dqbuf()?;

        let mut state = self.lock();
        // The pool may have been stopped while we were waiting for the driver.
        if !state.streaming {
            return Err(VideoError::NoBuffers);
        }
        let PoolState {
            slots,
            release_table,
            ..
        } = &mut *state;
        let slots = slots.as_mut().ok_or(VideoError::ApiFail(Errno::EINVAL))?;
        let index = dqbuf.index as usize;
        if index >= slots.len() {
            error!("Driver returned invalid {} buffer {}", D::QUEUE, index);
            return Err(VideoError::ApiFail(Errno::EINVAL));
        }

        let was_queued = slots.release(index);
        let buffer = slots
            .get_mut(index)
            .ok_or(VideoError::ApiFail(Errno::EINVAL))?;
        self.complete(buffer, &dqbuf);
        let mut dequeued = DequeuedBuffer::new(buffer, &dqbuf);

        if slots.tracks_references() {
            if let Some(table) = release_table.as_mut() {
                let entry = table.entry(index).unwrap_or_default();
                slots.release_references(&entry);
                table.reset_entry(index);
                dequeued.release = Some(entry);
                // Report the state after reconciliation.
                if let Some(buffer) = slots.get(index) {
                    dequeued.buffer = buffer.info();
                }
            }
            debug_assert!(slots.references_consistent());
        }

        if !was_queued {
            warn!("{} buffer {} was not queued", D::QUEUE, index);
            return Err(VideoError::NoBuffers);
        }
        trace!("Dequeued {} buffer {} (extension)", D::QUEUE, index);

        Ok(dequeued)
    }

    /// Attach client memory to the first buffer that has none. Clients must register their
    /// buffers in the same order every time the pool is set up, as buffers are later designated
    /// by their position in registration order.
    pub fn register(&self, planes: &[PlaneSource]) -> VideoResult<usize> {
        if planes.len() != self.config.num_planes {
            return Err(VideoError::BadParam("wrong number of planes"));
        }

        let mut state = self.lock();
        let memory = state.memory;
        let slots = state
            .slots
            .as_mut()
            .ok_or(VideoError::BadParam("pool is not set up"))?;
        let index = slots.first_unregistered().ok_or(VideoError::NoBuffers)?;
        let buffer = slots
            .get_mut(index)
            .ok_or(VideoError::BadParam("buffer index out of range"))?;
        buffer.planes = planes
            .iter()
            .map(|source| {
                Plane::new(
                    PlaneMemory::imported(memory, source.addr, source.fd),
                    source.alloc_size,
                )
            })
            .collect();
        buffer.registered = true;
        debug!("Registered {} buffer {}", D::QUEUE, index);

        Ok(index)
    }

    /// Detach all client memory from the buffers of a shared pool.
    pub fn clear_registered(&self) -> VideoResult<()> {
        let mut state = self.lock();
        if !state.shared {
            return Err(VideoError::BadParam("pool does not use client memory"));
        }
        if let Some(slots) = state.slots.as_mut() {
            slots.clear_registered();
        }

        Ok(())
    }

    /// Consider all buffers as dequeued, e.g. after the driver flushed them.
    pub fn clear_queue(&self) {
        if let Some(slots) = self.lock().slots.as_mut() {
            slots.reset_queued();
        }
    }

    /// Unmap and free all the buffers. The pool can be set up again afterwards.
    pub fn cleanup(&self) -> VideoResult<()> {
        let mut state = self.lock();
        if state.streaming {
            return Err(VideoError::BadParam("cannot clean up a streaming pool"));
        }
        let memory = match state.slots.take() {
            // Planes must be unmapped before the driver can free the buffers.
            Some(slots) => {
                drop(slots);
                state.memory
            }
            None => self.allocation_memory(state.shared),
        };
        self.device.reqbufs(D::QUEUE, memory, 0)?;
        debug!("Freed {} queue buffers", D::QUEUE);

        Ok(())
    }

    /// State of buffer `index`.
    pub fn get_buffer(&self, index: usize) -> VideoResult<BufferInfo> {
        self.lock()
            .slots
            .as_ref()
            .and_then(|slots| slots.get(index))
            .map(Buffer::info)
            .ok_or(VideoError::BadParam("invalid buffer index"))
    }

    /// Block until the driver is ready for this direction. Returns `false` if the pool gave up
    /// after its maximum number of poll timeouts.
    pub fn wait(&self) -> VideoResult<bool> {
        poller::wait_ready(
            &*self.device,
            D::QUEUE.direction(),
            self.config.poll_timeout_ms,
            self.config.max_poll_timeouts,
        )
    }
}

impl<D: Direction, Dev: MfcDevice> Drop for BufferPool<D, Dev> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop {} queue: {}", D::QUEUE, e);
        }
        if let Err(e) = self.cleanup() {
            warn!("Failed to free {} queue buffers: {}", D::QUEUE, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{Call, MockDevice};
    use crate::QueueType;
    use direction::{Input, Output};

    fn mapped_pool<D: Direction>(
        device: &Arc<MockDevice>,
        num_planes: usize,
    ) -> BufferPool<D, MockDevice> {
        BufferPool::new(
            Arc::clone(device),
            PoolConfig::new(num_planes, MemoryType::UserPtr).default_count(4),
        )
    }

    fn dmabuf_pool(device: &Arc<MockDevice>) -> BufferPool<Output, MockDevice> {
        let pool = BufferPool::new(
            Arc::clone(device),
            PoolConfig::new(2, MemoryType::DmaBuf)
                .default_count(4)
                .track_references(),
        );
        pool.set_shareable(true).unwrap();
        pool
    }

    fn dmabuf(fd: i32) -> [PlaneSource; 2] {
        [
            PlaneSource::from_dmabuf(fd, None, 0, 4096),
            PlaneSource::from_dmabuf(fd + 100, None, 0, 2048),
        ]
    }

    #[test]
    fn setup_maps_buffers() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Input>(&device, 1);

        pool.setup(0).unwrap();
        assert_eq!(pool.num_buffers(), 4);
        assert!(device
            .calls()
            .contains(&Call::Reqbufs(QueueType::VideoOutputMplane, MemoryType::Mmap, 4)));
        let buffer = pool.get_buffer(3).unwrap();
        assert!(buffer.registered);
        assert_eq!(buffer.planes.len(), 1);
        assert_eq!(buffer.planes[0].allocated_size, 4096);
        assert!(buffer.planes[0].addr.is_some());

        assert!(matches!(pool.setup(4), Err(VideoError::BadParam(_))));
    }

    #[test]
    fn setup_without_default_rejects_zero() {
        let device = Arc::new(MockDevice::new());
        let pool: BufferPool<Input, _> =
            BufferPool::new(Arc::clone(&device), PoolConfig::new(1, MemoryType::UserPtr));
        assert!(matches!(pool.setup(0), Err(VideoError::BadParam(_))));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn setup_fails_when_device_grants_fewer_buffers() {
        let device = Arc::new(MockDevice::new());
        device.grant(2);
        let pool = mapped_pool::<Input>(&device, 1);

        assert!(matches!(
            pool.setup(4),
            Err(VideoError::NoMem {
                requested: 4,
                granted: 2
            })
        ));
        assert!(!pool.is_configured());
        assert!(matches!(
            device.calls().last(),
            Some(Call::Reqbufs(_, MemoryType::Mmap, 0))
        ));
    }

    #[test]
    fn setup_unwinds_on_map_failure() {
        let device = Arc::new(MockDevice::new());
        device.fail_map_at(2);
        let pool = mapped_pool::<Output>(&device, 2);

        assert!(matches!(pool.setup(4), Err(VideoError::MapFail(_))));
        assert!(!pool.is_configured());
        assert_eq!(pool.num_buffers(), 0);
    }

    #[test]
    fn enqueue_dequeue_mapped_buffer() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Input>(&device, 1);
        pool.setup(4).unwrap();
        pool.run().unwrap();

        let addr = pool.get_buffer(0).unwrap().planes[0].addr.unwrap();
        let index = pool
            .enqueue(&[PlaneSource::from_addr(addr, 100)], Some(42), BufferFlags::empty())
            .unwrap();
        assert_eq!(index, 0);
        assert!(pool.get_buffer(0).unwrap().queued);

        // Same buffer cannot be queued twice.
        assert!(matches!(
            pool.enqueue(&[PlaneSource::from_addr(addr, 100)], None, BufferFlags::empty()),
            Err(VideoError::NoBuffers)
        ));

        let dequeued = pool.dequeue().unwrap();
        assert_eq!(dequeued.index(), 0);
        assert_eq!(dequeued.buffer.tag, Some(42));
        assert!(!dequeued.buffer.queued);
        assert_eq!(dequeued.buffer.planes[0].used_size, 100);
        assert!(pool.dequeue().is_none());
    }

    #[test]
    fn enqueue_rejects_oversized_data() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Input>(&device, 1);
        pool.setup(1).unwrap();
        let addr = pool.get_buffer(0).unwrap().planes[0].addr.unwrap();

        assert!(matches!(
            pool.enqueue(&[PlaneSource::from_addr(addr, 5000)], None, BufferFlags::empty()),
            Err(VideoError::BadParam(_))
        ));
        assert!(!pool.get_buffer(0).unwrap().queued);
    }

    #[test]
    fn failed_enqueue_rolls_back() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Input>(&device, 1);
        pool.setup(2).unwrap();
        device.fail_next_qbuf(Errno::EINVAL);

        assert!(matches!(
            pool.enqueue(&[], Some(1), BufferFlags::empty()),
            Err(VideoError::ApiFail(Errno::EINVAL))
        ));
        let buffer = pool.get_buffer(0).unwrap();
        assert!(!buffer.queued);
        assert_eq!(buffer.tag, None);

        assert_eq!(pool.enqueue(&[], Some(1), BufferFlags::empty()).unwrap(), 0);
    }

    #[test]
    fn end_of_stream_flag_is_not_sticky() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Input>(&device, 1);
        pool.setup(2).unwrap();

        pool.enqueue(&[], None, BufferFlags::LAST).unwrap();
        pool.enqueue(&[], None, BufferFlags::empty()).unwrap();
        let flags: Vec<_> = device
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Qbuf(_, b) => Some(b.flags),
                _ => None,
            })
            .collect();
        assert_eq!(flags, vec![BufferFlags::LAST, BufferFlags::empty()]);
    }

    #[test]
    fn dequeue_requires_streaming() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Input>(&device, 1);
        pool.setup(2).unwrap();
        pool.enqueue(&[], None, BufferFlags::empty()).unwrap();

        assert!(pool.dequeue().is_none());
        assert_eq!(device.count_calls(|c| matches!(c, Call::Dqbuf(_))), 0);
    }

    #[test]
    fn run_and_stop_are_idempotent() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Output>(&device, 2);
        pool.setup(2).unwrap();

        pool.run().unwrap();
        pool.run().unwrap();
        assert_eq!(device.count_calls(|c| matches!(c, Call::StreamOn(_))), 1);

        pool.enqueue(&[], None, BufferFlags::empty()).unwrap();
        pool.stop().unwrap();
        pool.stop().unwrap();
        assert_eq!(device.count_calls(|c| matches!(c, Call::StreamOff(_))), 1);
        assert!(!pool.is_streaming());
        assert!(!pool.get_buffer(0).unwrap().queued);
    }

    #[test]
    fn stop_resets_buffers_on_failure() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Output>(&device, 2);
        pool.setup(2).unwrap();
        pool.run().unwrap();
        pool.enqueue(&[], None, BufferFlags::empty()).unwrap();

        device.fail_streamoff(Errno::EIO);
        assert!(matches!(pool.stop(), Err(VideoError::ApiFail(Errno::EIO))));
        assert!(!pool.is_streaming());
        assert!(!pool.get_buffer(0).unwrap().queued);
    }

    #[test]
    fn shared_pool_register_and_enqueue() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Input>(&device, 1);
        pool.set_shareable(true).unwrap();
        pool.setup(2).unwrap();
        assert!(matches!(
            pool.set_shareable(false),
            Err(VideoError::BadParam(_))
        ));
        assert!(device.count_calls(|c| matches!(c, Call::Querybuf(..))) == 0);

        let plane = PlaneSource {
            addr: Some(0x1000),
            alloc_size: 8192,
            ..Default::default()
        };
        assert!(matches!(
            pool.register(&[plane, plane]),
            Err(VideoError::BadParam(_))
        ));
        assert_eq!(pool.register(&[plane]).unwrap(), 0);
        let other = PlaneSource {
            addr: Some(0x9000),
            alloc_size: 8192,
            ..Default::default()
        };
        assert_eq!(pool.register(&[other]).unwrap(), 1);
        assert!(matches!(pool.register(&[other]), Err(VideoError::NoBuffers)));

        let index = pool
            .enqueue(
                &[PlaneSource::from_addr(0x9000, 10)],
                None,
                BufferFlags::empty(),
            )
            .unwrap();
        assert_eq!(index, 1);
        let qbuf = device.calls().into_iter().rev().find_map(|c| match c {
            Call::Qbuf(_, b) => Some(b),
            _ => None,
        });
        let qbuf = qbuf.unwrap();
        assert_eq!(qbuf.memory, MemoryType::UserPtr);
        assert_eq!(qbuf.planes[0].backing, PlaneBacking::UserPtr(0x9000));
        assert_eq!(qbuf.planes[0].length, 8192);

        // Unknown addresses are refused.
        assert!(matches!(
            pool.enqueue(
                &[PlaneSource::from_addr(0x5000, 10)],
                None,
                BufferFlags::empty()
            ),
            Err(VideoError::NoBuffers)
        ));

        pool.clear_registered().unwrap();
        assert!(!pool.get_buffer(0).unwrap().registered);
    }

    #[test]
    fn clear_registered_requires_shared_pool() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Input>(&device, 1);
        pool.setup(2).unwrap();
        assert!(matches!(
            pool.clear_registered(),
            Err(VideoError::BadParam(_))
        ));
        assert!(pool.get_buffer(0).unwrap().registered);
    }

    #[test]
    fn extension_enqueue_tracks_references() {
        let device = Arc::new(MockDevice::new());
        let pool = dmabuf_pool(&device);
        pool.setup(0).unwrap();
        pool.run().unwrap();

        let index = pool.enqueue_extension(&dmabuf(7), Some(1)).unwrap();
        let buffer = pool.get_buffer(index).unwrap();
        assert!(buffer.queued);
        assert!(buffer.slot_in_use);
        assert_eq!(buffer.ref_count, 1);
        assert_eq!(buffer.planes[0].fd, Some(7));
        assert_eq!(buffer.planes[1].fd, Some(107));

        // Another frame goes into another slot.
        let other = pool.enqueue_extension(&dmabuf(8), Some(2)).unwrap();
        assert_ne!(index, other);
    }

    #[test]
    fn extension_requires_shared_pool() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Output>(&device, 2);
        pool.setup(2).unwrap();
        assert!(matches!(
            pool.enqueue_extension(&dmabuf(7), None),
            Err(VideoError::BadParam(_))
        ));
    }

    #[test]
    fn extension_enqueue_failure_rolls_back_reference() {
        let device = Arc::new(MockDevice::new());
        let pool = dmabuf_pool(&device);
        pool.setup(2).unwrap();
        device.fail_next_qbuf(Errno::EINVAL);

        assert!(matches!(
            pool.enqueue_extension(&dmabuf(7), None),
            Err(VideoError::ApiFail(_))
        ));
        let buffer = pool.get_buffer(0).unwrap();
        assert!(!buffer.queued);
        assert!(!buffer.slot_in_use);
        assert_eq!(buffer.ref_count, 0);
    }

    #[test]
    fn extension_dequeue_reconciles_references() {
        let device = Arc::new(MockDevice::new());
        let pool = dmabuf_pool(&device);
        pool.attach_release_table(ReleaseTable::new().unwrap());
        pool.setup(4).unwrap();
        pool.run().unwrap();

        let x = pool.enqueue_extension(&dmabuf(7), None).unwrap();
        let y = pool.enqueue_extension(&dmabuf(8), None).unwrap();

        device.complete(QueueType::VideoCaptureMplane, x as u32, 0, BufferFlags::empty());
        let dequeued = pool.dequeue_extension().unwrap();
        assert_eq!(dequeued.index(), x);
        assert_eq!(dequeued.release.as_ref().map(ReleaseEntry::is_empty), Some(true));
        // Still referenced by the decoder.
        assert!(pool.get_buffer(x).unwrap().slot_in_use);

        pool.with_release_table(|table| table.set_entry(y, &ReleaseEntry::new(y as i32, &[7])));
        device.complete(QueueType::VideoCaptureMplane, y as u32, 0, BufferFlags::empty());
        let dequeued = pool.dequeue_extension().unwrap();
        assert_eq!(dequeued.index(), y);
        assert_eq!(
            dequeued.release.unwrap().released_fds().collect::<Vec<_>>(),
            vec![7]
        );

        let buffer = pool.get_buffer(x).unwrap();
        assert_eq!(buffer.ref_count, 0);
        assert!(!buffer.slot_in_use);
        // The consumed descriptor is reset.
        assert_eq!(
            pool.with_release_table(|table| table.entry(y)),
            Some(Some(ReleaseEntry::default()))
        );
    }

    #[test]
    fn extension_dequeue_of_unqueued_buffer() {
        let device = Arc::new(MockDevice::new());
        let pool = dmabuf_pool(&device);
        pool.setup(2).unwrap();
        assert!(matches!(
            pool.dequeue_extension(),
            Err(VideoError::ApiFail(_))
        ));

        pool.run().unwrap();
        device.complete(QueueType::VideoCaptureMplane, 1, 0, BufferFlags::empty());
        assert!(matches!(
            pool.dequeue_extension(),
            Err(VideoError::NoBuffers)
        ));
    }

    #[test]
    fn dequeue_after_concurrent_stop() {
        let device = Arc::new(MockDevice::new());
        let pool = Arc::new(mapped_pool::<Input>(&device, 1));
        pool.setup(2).unwrap();
        pool.run().unwrap();
        pool.enqueue(&[], None, BufferFlags::empty()).unwrap();

        let stopper = Arc::clone(&pool);
        device.before_dqbuf(move || stopper.stop().unwrap());
        assert!(pool.dequeue().is_none());
        assert!(!pool.is_streaming());
        assert!(!pool.get_buffer(0).unwrap().queued);
    }

    #[test]
    fn extension_dequeue_after_concurrent_stop() {
        let device = Arc::new(MockDevice::new());
        let pool = Arc::new(dmabuf_pool(&device));
        pool.setup(2).unwrap();
        pool.run().unwrap();
        let index = pool.enqueue_extension(&dmabuf(7), None).unwrap();

        let stopper = Arc::clone(&pool);
        device.before_dqbuf(move || stopper.stop().unwrap());
        assert!(matches!(
            pool.dequeue_extension(),
            Err(VideoError::NoBuffers)
        ));
        let buffer = pool.get_buffer(index).unwrap();
        assert!(!buffer.queued);
        assert!(!buffer.slot_in_use);
        assert_eq!(buffer.ref_count, 0);
    }

    #[test]
    fn extension_enqueue_with_fewer_planes_clears_the_rest() {
        let device = Arc::new(MockDevice::new());
        let pool = dmabuf_pool(&device);
        pool.setup(2).unwrap();
        pool.run().unwrap();

        let index = pool.enqueue_extension(&dmabuf(7), None).unwrap();
        pool.dequeue_extension().unwrap();
        assert_eq!(pool.get_buffer(index).unwrap().planes[1].fd, Some(107));

        // Same first plane, so the same slot is reused.
        let again = pool.enqueue_extension(&dmabuf(7)[..1], None).unwrap();
        assert_eq!(again, index);
        let buffer = pool.get_buffer(index).unwrap();
        assert_eq!(buffer.planes[0].fd, Some(7));
        assert_eq!(buffer.planes[1], buffer::PlaneInfo::default());
    }

    #[test]
    fn clear_queue_keeps_referenced_slots() {
        let device = Arc::new(MockDevice::new());
        let pool = dmabuf_pool(&device);
        pool.setup(2).unwrap();
        pool.run().unwrap();
        pool.enqueue_extension(&dmabuf(7), None).unwrap();

        pool.clear_queue();
        let buffer = pool.get_buffer(0).unwrap();
        assert!(!buffer.queued);
        assert!(buffer.slot_in_use);

        pool.stop().unwrap();
        let buffer = pool.get_buffer(0).unwrap();
        assert!(!buffer.slot_in_use);
        assert_eq!(buffer.ref_count, 0);
    }

    #[test]
    fn enqueue_all_queues_every_buffer() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Output>(&device, 1);
        pool.setup(3).unwrap();
        pool.enqueue(&[], None, BufferFlags::empty()).unwrap();

        pool.enqueue_all().unwrap();
        assert_eq!(
            device.queued_indices(QueueType::VideoCaptureMplane),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn cleanup_frees_buffers() {
        let device = Arc::new(MockDevice::new());
        let pool = mapped_pool::<Input>(&device, 1);
        pool.setup(2).unwrap();
        pool.run().unwrap();
        assert!(matches!(pool.cleanup(), Err(VideoError::BadParam(_))));

        pool.stop().unwrap();
        pool.cleanup().unwrap();
        assert!(!pool.is_configured());
        assert!(device
            .calls()
            .contains(&Call::Reqbufs(QueueType::VideoOutputMplane, MemoryType::Mmap, 0)));
        pool.setup(2).unwrap();
    }

    #[test]
    fn cleanup_of_unconfigured_pool_still_frees() {
        let device = Arc::new(MockDevice::new());
        let pool = dmabuf_pool(&device);
        pool.cleanup().unwrap();
        assert_eq!(
            device.calls(),
            vec![Call::Reqbufs(QueueType::VideoCaptureMplane, MemoryType::DmaBuf, 0)]
        );

        let pool = mapped_pool::<Input>(&device, 1);
        device.clear_calls();
        pool.cleanup().unwrap();
        assert_eq!(
            device.calls(),
            vec![Call::Reqbufs(QueueType::VideoOutputMplane, MemoryType::Mmap, 0)]
        );
    }

    #[test]
    fn concurrent_enqueues_never_share_a_buffer() {
        let device = Arc::new(MockDevice::new());
        let pool = Arc::new(mapped_pool::<Input>(&device, 1));
        pool.setup(4).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.enqueue(&[], None, BufferFlags::empty()))
            })
            .collect();
        let mut indices: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap().ok())
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }
}
