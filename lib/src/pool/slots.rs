//! Slot table of a buffer pool.
//!
//! All the state transitions of the buffers of a pool happen here, so that the two invariants the
//! pool relies on are maintained in one place:
//!
//! * a buffer cannot be queued twice without being dequeued (or the pool stopped) in between;
//! * when reference tracking is enabled, a slot is in use if and only if it is queued or still
//!   referenced by the driver.
use std::os::unix::io::RawFd;

use log::{debug, trace, warn};

use super::buffer::Buffer;
use crate::dpb::ReleaseEntry;
use crate::error::{VideoError, VideoResult};
use crate::memory::PlaneKey;

pub struct SlotTable {
    buffers: Vec<Buffer>,
    track_references: bool,
}

impl SlotTable {
    pub fn new(buffers: Vec<Buffer>, track_references: bool) -> Self {
        SlotTable {
            buffers,
            track_references,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn tracks_references(&self) -> bool {
        self.track_references
    }

    pub fn get(&self, index: usize) -> Option<&Buffer> {
        self.buffers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Buffer> {
        self.buffers.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter()
    }

    fn buffer_mut(&mut self, index: usize) -> VideoResult<&mut Buffer> {
        self.buffers
            .get_mut(index)
            .ok_or(VideoError::BadParam("buffer index out of range"))
    }

    /// Index of the first buffer that is not queued and whose first plane matches `key`. Without
    /// a key, any buffer that is not queued matches.
    pub fn find_by_key(&self, key: Option<PlaneKey>) -> Option<usize> {
        self.buffers
            .iter()
            .find(|b| !b.queued && (key.is_none() || b.key() == key))
            .map(|b| b.index)
    }

    /// Index of the first buffer that can receive a new frame: not queued and, when references
    /// are tracked, not referenced anymore.
    pub fn acquire_free_slot(&self) -> Option<usize> {
        self.buffers
            .iter()
            .find(|b| !b.queued && !(self.track_references && b.slot_in_use))
            .map(|b| b.index)
    }

    /// Index of the first buffer no memory has been registered for.
    pub fn first_unregistered(&self) -> Option<usize> {
        self.buffers
            .iter()
            .find(|b| !b.registered)
            .map(|b| b.index)
    }

    /// Hand buffer `index` over to the driver.
    pub fn mark_queued(&mut self, index: usize, tag: Option<usize>) -> VideoResult<()> {
        let track_references = self.track_references;
        let buffer = self.buffer_mut(index)?;
        if buffer.queued {
            warn!("Buffer {} is already queued", index);
            return Err(VideoError::NoBuffers);
        }
        buffer.queued = true;
        buffer.tag = tag;
        if track_references {
            buffer.slot_in_use = true;
        }

        Ok(())
    }

    /// Take a reference to the frame held by buffer `index`.
    pub fn acquire_reference(&mut self, index: usize) -> VideoResult<()> {
        if !self.track_references {
            return Ok(());
        }
        let buffer = self.buffer_mut(index)?;
        buffer.ref_count += 1;
        buffer.slot_in_use = true;

        Ok(())
    }

    /// Undo `mark_queued`, and `acquire_reference` if `referenced` is set, after the driver
    /// refused the buffer.
    pub fn rollback(&mut self, index: usize, referenced: bool) {
        let track_references = self.track_references;
        let Some(buffer) = self.buffers.get_mut(index) else {
            return;
        };
        buffer.queued = false;
        buffer.tag = None;
        if track_references {
            if referenced {
                buffer.ref_count = buffer.ref_count.saturating_sub(1);
            }
            if buffer.ref_count == 0 {
                buffer.slot_in_use = false;
            }
        }
    }

    /// Take buffer `index` back from the driver. Returns whether it was queued.
    pub fn release(&mut self, index: usize) -> bool {
        let track_references = self.track_references;
        let Some(buffer) = self.buffers.get_mut(index) else {
            return false;
        };
        let was_queued = buffer.queued;
        buffer.queued = false;
        if track_references && buffer.ref_count == 0 {
            buffer.slot_in_use = false;
        }

        was_queued
    }

    /// Drop the references the driver released according to `entry`, the release descriptor of a
    /// just dequeued buffer.
    pub fn release_references(&mut self, entry: &ReleaseEntry) {
        if !self.track_references {
            return;
        }

        for fd in entry.released_fds() {
            self.release_reference(fd);
        }
    }

    fn release_reference(&mut self, fd: RawFd) {
        for buffer in self
            .buffers
            .iter_mut()
            .filter(|b| b.first_fd() == Some(fd))
        {
            // A queued buffer keeps the reference taken when it was queued.
            if buffer.ref_count > 1 || (!buffer.queued && buffer.ref_count > 0) {
                buffer.ref_count -= 1;
            }
            if buffer.ref_count == 0 && !buffer.queued {
                buffer.slot_in_use = false;
            }
            trace!(
                "fd {} released, buffer {} now has {} references",
                fd,
                buffer.index,
                buffer.ref_count
            );
        }
    }

    /// Forget about all queued buffers, e.g. after the driver dropped them. Referenced slots stay
    /// in use.
    pub fn reset_queued(&mut self) {
        let track_references = self.track_references;
        for buffer in self.buffers.iter_mut() {
            buffer.queued = false;
            if track_references && buffer.ref_count == 0 {
                buffer.slot_in_use = false;
            }
        }
    }

    /// Return every buffer to its idle state. Used when streaming stops: the driver holds no
    /// buffer or reference anymore.
    pub fn reset(&mut self) {
        for buffer in self.buffers.iter_mut() {
            buffer.queued = false;
            buffer.slot_in_use = false;
            buffer.ref_count = 0;
        }
        debug!("Reset {} buffers", self.buffers.len());
    }

    /// Detach all registered memory.
    pub fn clear_registered(&mut self) {
        for buffer in self.buffers.iter_mut() {
            for plane in buffer.planes.iter_mut() {
                *plane = Default::default();
            }
            buffer.registered = false;
        }
    }

    /// Whether the in-use state of every slot is consistent with its queued and referenced state.
    pub fn references_consistent(&self) -> bool {
        !self.track_references
            || self
                .buffers
                .iter()
                .all(|b| b.slot_in_use == (b.queued || b.ref_count > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PlaneMemory;
    use crate::pool::buffer::Plane;

    fn dmabuf_table(fds: &[RawFd]) -> SlotTable {
        SlotTable::new(
            fds.iter()
                .enumerate()
                .map(|(index, &fd)| {
                    Buffer::new(
                        index,
                        vec![
                            Plane::new(PlaneMemory::DmaBuf { fd, addr: None }, 4096),
                            Plane::new(PlaneMemory::DmaBuf { fd: fd + 100, addr: None }, 2048),
                        ],
                        true,
                    )
                })
                .collect(),
            true,
        )
    }

    fn queue_referenced(table: &mut SlotTable, index: usize) {
        table.mark_queued(index, None).unwrap();
        table.acquire_reference(index).unwrap();
    }

    #[test]
    fn queued_buffer_cannot_be_queued_again() {
        let mut table = dmabuf_table(&[7, 8]);
        table.mark_queued(0, Some(1)).unwrap();
        assert!(matches!(
            table.mark_queued(0, Some(2)),
            Err(VideoError::NoBuffers)
        ));
        assert_eq!(table.get(0).unwrap().tag(), Some(1));

        assert!(table.release(0));
        assert!(!table.release(0));
        table.mark_queued(0, Some(2)).unwrap();
    }

    #[test]
    fn find_by_key_skips_queued_buffers() {
        let mut table = dmabuf_table(&[7, 8]);
        assert_eq!(table.find_by_key(Some(PlaneKey::Fd(8))), Some(1));
        assert_eq!(table.find_by_key(None), Some(0));

        table.mark_queued(1, None).unwrap();
        assert_eq!(table.find_by_key(Some(PlaneKey::Fd(8))), None);
        assert_eq!(table.find_by_key(Some(PlaneKey::Fd(9))), None);
    }

    #[test]
    fn referenced_slots_are_not_free() {
        let mut table = dmabuf_table(&[7, 8]);
        queue_referenced(&mut table, 0);
        assert_eq!(table.acquire_free_slot(), Some(1));

        table.release(0);
        assert!(table.get(0).unwrap().is_slot_in_use());
        assert_eq!(table.acquire_free_slot(), Some(1));
        assert!(table.references_consistent());
    }

    #[test]
    fn release_entry_frees_unqueued_slot() {
        let mut table = dmabuf_table(&[7, 8]);
        queue_referenced(&mut table, 0);
        queue_referenced(&mut table, 1);

        // Buffer 0 comes back but the driver keeps referencing it.
        table.release(0);
        table.release_references(&ReleaseEntry::default());
        assert_eq!(table.get(0).unwrap().ref_count(), 1);
        assert!(table.get(0).unwrap().is_slot_in_use());

        // Buffer 1 comes back and its descriptor releases fd 7.
        table.release(1);
        table.release_references(&ReleaseEntry::new(1, &[7]));
        let buffer = table.get(0).unwrap();
        assert_eq!(buffer.ref_count(), 0);
        assert!(!buffer.is_slot_in_use());
        assert!(table.references_consistent());
    }

    #[test]
    fn release_entry_keeps_queued_slot_reference() {
        let mut table = dmabuf_table(&[7, 8]);
        queue_referenced(&mut table, 0);
        table.release(0);
        // Queued again while still referenced: two references.
        queue_referenced(&mut table, 0);
        assert_eq!(table.get(0).unwrap().ref_count(), 2);

        table.release_references(&ReleaseEntry::new(1, &[7]));
        assert_eq!(table.get(0).unwrap().ref_count(), 1);

        // Last reference of a queued buffer is kept.
        table.release_references(&ReleaseEntry::new(1, &[7]));
        let buffer = table.get(0).unwrap();
        assert_eq!(buffer.ref_count(), 1);
        assert!(buffer.is_slot_in_use());
        assert!(table.references_consistent());
    }

    #[test]
    fn release_entry_stops_at_terminator() {
        let mut table = dmabuf_table(&[7, 8]);
        for index in 0..2 {
            queue_referenced(&mut table, index);
            table.release(index);
        }

        let mut entry = ReleaseEntry::new(0, &[7]);
        entry.fds[2][0] = 8;
        table.release_references(&entry);
        assert_eq!(table.get(0).unwrap().ref_count(), 0);
        assert_eq!(table.get(1).unwrap().ref_count(), 1);
    }

    #[test]
    fn rollback_restores_previous_state() {
        let mut table = dmabuf_table(&[7]);
        queue_referenced(&mut table, 0);
        table.rollback(0, true);
        let buffer = table.get(0).unwrap();
        assert!(!buffer.is_queued());
        assert_eq!(buffer.tag(), None);
        assert_eq!(buffer.ref_count(), 0);
        assert!(!buffer.is_slot_in_use());

        // A slot still referenced from an earlier decode stays in use.
        queue_referenced(&mut table, 0);
        table.release(0);
        queue_referenced(&mut table, 0);
        table.rollback(0, true);
        let buffer = table.get(0).unwrap();
        assert_eq!(buffer.ref_count(), 1);
        assert!(buffer.is_slot_in_use());
        assert!(table.references_consistent());
    }

    #[test]
    fn reset_queued_keeps_references() {
        let mut table = dmabuf_table(&[7, 8]);
        queue_referenced(&mut table, 0);
        table.mark_queued(1, None).unwrap();

        table.reset_queued();
        assert!(!table.get(0).unwrap().is_queued());
        assert!(table.get(0).unwrap().is_slot_in_use());
        assert!(!table.get(1).unwrap().is_slot_in_use());
        assert!(table.references_consistent());

        table.reset();
        assert!(table.iter().all(|b| !b.is_slot_in_use() && b.ref_count() == 0));
    }

    #[test]
    fn untracked_tables_ignore_references() {
        let mut table = SlotTable::new(vec![Buffer::new(0, vec![], true)], false);
        table.mark_queued(0, None).unwrap();
        table.acquire_reference(0).unwrap();
        assert_eq!(table.get(0).unwrap().ref_count(), 0);
        assert!(!table.get(0).unwrap().is_slot_in_use());
        assert_eq!(table.acquire_free_slot(), None);
        table.release(0);
        assert_eq!(table.acquire_free_slot(), Some(0));
    }

    #[test]
    fn clear_registered_detaches_memory() {
        let mut table = dmabuf_table(&[7, 8]);
        assert_eq!(table.first_unregistered(), None);
        table.clear_registered();
        assert_eq!(table.first_unregistered(), Some(0));
        assert!(table.get(1).unwrap().planes()[0].memory.is_empty());
    }

    /// Minimal linear congruential generator, so sequences are reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: usize) -> usize {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 33) % bound as u64) as usize
        }
    }

    #[test]
    fn random_sequences_keep_invariants() {
        const FDS: [RawFd; 6] = [10, 11, 12, 13, 14, 15];

        for seed in 0..32 {
            let mut rng = Lcg(seed);
            let mut table = dmabuf_table(&FDS);

            for _ in 0..500 {
                match rng.next(10) {
                    // Extension enqueue of a random frame.
                    0..=3 => {
                        let fd = FDS[rng.next(FDS.len())];
                        let slot = table
                            .find_by_key(Some(PlaneKey::Fd(fd)))
                            .or_else(|| table.acquire_free_slot());
                        if let Some(index) = slot {
                            assert!(!table.get(index).unwrap().is_queued());
                            queue_referenced(&mut table, index);
                        }
                    }
                    // Queuing a queued buffer again is always refused.
                    4 => {
                        let index = rng.next(FDS.len());
                        let was_queued = table.get(index).unwrap().is_queued();
                        assert_eq!(table.mark_queued(index, None).is_err(), was_queued);
                        if !was_queued {
                            table.acquire_reference(index).unwrap();
                        }
                    }
                    // Dequeue of a random queued buffer, releasing random frames.
                    5..=8 => {
                        let queued: Vec<usize> = table
                            .iter()
                            .filter(|b| b.is_queued())
                            .map(Buffer::index)
                            .collect();
                        if queued.is_empty() {
                            continue;
                        }
                        let index = queued[rng.next(queued.len())];
                        assert!(table.release(index));
                        let released: Vec<RawFd> = (0..rng.next(4))
                            .map(|_| FDS[rng.next(FDS.len())])
                            .collect();
                        table.release_references(&ReleaseEntry::new(index as i32, &released));
                    }
                    _ => {
                        if rng.next(4) == 0 {
                            table.reset();
                        } else {
                            table.reset_queued();
                        }
                    }
                }

                assert!(table.references_consistent(), "seed {}", seed);
            }
        }
    }
}
