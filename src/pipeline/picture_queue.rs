//! Ring buffer of decoded pictures ready for display
//!
//! Single producer (video stage), single consumer (refresh stage). Slots are
//! allocated once and recycled: the producer fills the slot at the write
//! index in place, so plane buffers are only reallocated when the picture
//! dimensions change.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Decoded and rescaled video picture
#[derive(Debug, Clone, Default)]
pub struct DecodedVideoFrame {
    /// One buffer per plane, tightly packed unless `strides` says otherwise
    pub planes: Vec<Vec<u8>>,
    pub strides: Vec<usize>,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in seconds
    pub pts: f64,
}

/// The queue was aborted while the producer waited for a free slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushAborted;

impl std::fmt::Display for PushAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "picture queue aborted")
    }
}

struct Inner {
    slots: Vec<DecodedVideoFrame>,
    rindex: usize,
    windex: usize,
    size: usize,
    aborted: bool,
}

/// Fixed-capacity picture ring buffer
///
/// Invariant: `0 <= len() <= capacity()`.
pub struct PictureQueue {
    inner: Mutex<Inner>,
    /// Signalled when a slot is freed or the queue is aborted
    slot_free: Condvar,
}

impl PictureQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                slots: vec![DecodedVideoFrame::default(); capacity],
                rindex: 0,
                windex: 0,
                size: 0,
                aborted: false,
            }),
            slot_free: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn len(&self) -> usize {
        self.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.lock().size == 0
    }

    pub fn is_full(&self) -> bool {
        let inner = self.lock();
        inner.size == inner.slots.len()
    }

    /// Fill the next free slot and publish it
    ///
    /// Blocks while the queue is full. `fill` runs without the lock held, on
    /// the slot's recycled buffers, and gets the previous picture's contents.
    pub fn push_with<F>(&self, pts: f64, fill: F) -> Result<(), PushAborted>
    where
        F: FnOnce(&mut DecodedVideoFrame),
    {
        let mut inner = self.lock();
        while inner.size == inner.slots.len() && !inner.aborted {
            inner = self
                .slot_free
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.aborted {
            return Err(PushAborted);
        }

        // The slot at windex is outside [rindex, rindex + size), the reader never touches it
        let windex = inner.windex;
        let mut picture = std::mem::take(&mut inner.slots[windex]);
        drop(inner);

        fill(&mut picture);
        picture.pts = pts;

        let mut inner = self.lock();
        if inner.aborted {
            inner.slots[windex] = picture;
            return Err(PushAborted);
        }
        inner.slots[windex] = picture;
        inner.windex = (windex + 1) % inner.slots.len();
        inner.size += 1;
        Ok(())
    }

    /// Presentation timestamp of the head picture without dequeuing it
    pub fn peek_pts(&self) -> Option<f64> {
        let inner = self.lock();
        if inner.size == 0 {
            return None;
        }
        Some(inner.slots[inner.rindex].pts)
    }

    /// Hand the head picture to `present`, then free its slot
    ///
    /// Wakes at most one blocked producer.
    pub fn pop_with<R, F>(&self, present: F) -> Option<R>
    where
        F: FnOnce(&DecodedVideoFrame) -> R,
    {
        let mut inner = self.lock();
        if inner.size == 0 {
            return None;
        }
        let rindex = inner.rindex;
        let result = present(&inner.slots[rindex]);
        inner.rindex = (rindex + 1) % inner.slots.len();
        inner.size -= 1;
        drop(inner);
        self.slot_free.notify_one();
        Some(result)
    }

    /// Release a producer blocked on a full queue; further pushes fail
    pub fn abort(&self) {
        self.lock().aborted = true;
        self.slot_free.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }
}

impl std::fmt::Debug for PictureQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("PictureQueue")
            .field("capacity", &inner.slots.len())
            .field("size", &inner.size)
            .field("rindex", &inner.rindex)
            .field("windex", &inner.windex)
            .field("aborted", &inner.aborted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn fill_plane(value: u8, len: usize) -> impl FnOnce(&mut DecodedVideoFrame) {
        move |picture| {
            picture.planes.resize(1, Vec::new());
            picture.planes[0].clear();
            picture.planes[0].resize(len, value);
            picture.width = len as u32;
            picture.height = 1;
        }
    }

    #[test]
    fn test_push_pop_order_and_wraparound() {
        let queue = PictureQueue::new(3);
        for round in 0..4 {
            for i in 0..3 {
                let pts = (round * 3 + i) as f64;
                queue.push_with(pts, fill_plane(i as u8, 4)).unwrap();
                assert!(queue.len() <= queue.capacity());
            }
            assert!(queue.is_full());
            for i in 0..3 {
                let expected = (round * 3 + i) as f64;
                assert_eq!(queue.peek_pts(), Some(expected));
                let pts = queue.pop_with(|p| p.pts).unwrap();
                assert_eq!(pts, expected);
            }
            assert!(queue.is_empty());
        }
        assert!(queue.pop_with(|p| p.pts).is_none());
    }

    #[test]
    fn test_slot_buffers_are_recycled() {
        let queue = PictureQueue::new(1);
        queue.push_with(0.0, fill_plane(1, 64)).unwrap();
        let first = queue.pop_with(|p| p.planes[0].as_ptr() as usize).unwrap();

        // Same dimensions: the fill sees the old buffer and reuses it in place
        queue
            .push_with(0.04, |picture| {
                assert_eq!(picture.planes[0].len(), 64);
                picture.planes[0].fill(2);
            })
            .unwrap();
        let second = queue.pop_with(|p| p.planes[0].as_ptr() as usize).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_push_blocks_only_when_full() {
        let queue = Arc::new(PictureQueue::new(2));
        queue.push_with(0.0, fill_plane(0, 1)).unwrap();
        queue.push_with(1.0, fill_plane(0, 1)).unwrap();

        let pushed = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let pushed = Arc::clone(&pushed);
            thread::spawn(move || {
                queue.push_with(2.0, fill_plane(0, 1)).unwrap();
                pushed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst), "push must block on a full queue");

        assert_eq!(queue.pop_with(|p| p.pts), Some(0.0));
        producer.join().unwrap();
        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek_pts(), Some(1.0));
    }

    #[test]
    fn test_abort_releases_blocked_producer() {
        let queue = Arc::new(PictureQueue::new(1));
        queue.push_with(0.0, fill_plane(0, 1)).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push_with(1.0, fill_plane(0, 1)))
        };

        thread::sleep(Duration::from_millis(30));
        queue.abort();
        assert_eq!(producer.join().unwrap(), Err(PushAborted));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.push_with(2.0, fill_plane(0, 1)), Err(PushAborted));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = PictureQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }
}
