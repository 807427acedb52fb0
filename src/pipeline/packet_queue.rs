//! Thread-safe FIFO of compressed packets for one stream

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use super::types::Packet;

/// Outcome of [`BoundedPacketQueue::get`]
#[derive(Debug)]
pub enum QueueGet {
    Packet(Packet),
    /// Nothing queued and the caller asked not to block
    Empty,
    /// The queue was closed and is drained, or it was aborted
    Closing,
}

struct Inner {
    packets: VecDeque<Packet>,
    size_bytes: usize,
    /// End of input: consumers drain what is left, then see `Closing`
    closed: bool,
    /// Shutdown: consumers see `Closing` immediately
    aborted: bool,
}

/// Bounded packet queue with byte accounting
///
/// The byte ceiling is advisory: `put` always accepts, the dispatch loop polls
/// [`BoundedPacketQueue::size_bytes`] and backs off by itself. This keeps the producer
/// from ever blocking against a consumer that is itself waiting on shutdown.
///
/// Invariant: `size_bytes` equals the sum of the sizes of the queued packets.
pub struct BoundedPacketQueue {
    name: &'static str,
    inner: Mutex<Inner>,
    available: Condvar,
}

impl BoundedPacketQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                packets: VecDeque::new(),
                size_bytes: 0,
                closed: false,
                aborted: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append a packet and wake one waiting consumer
    ///
    /// Packets put after an abort are discarded.
    pub fn put(&self, packet: Packet) {
        let mut inner = self.lock();
        if inner.aborted {
            log::trace!("{}: dropping packet after abort", self.name);
            return;
        }
        inner.size_bytes += packet.size();
        inner.packets.push_back(packet);
        drop(inner);
        self.available.notify_one();
    }

    /// Remove the head packet
    ///
    /// With `block` set, waits until a packet arrives or the queue closes.
    pub fn get(&self, block: bool) -> QueueGet {
        let mut inner = self.lock();
        loop {
            if inner.aborted {
                return QueueGet::Closing;
            }
            if let Some(packet) = inner.packets.pop_front() {
                inner.size_bytes -= packet.size();
                return QueueGet::Packet(packet);
            }
            if inner.closed {
                return QueueGet::Closing;
            }
            if !block {
                return QueueGet::Empty;
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Mark the end of input. Queued packets are still delivered.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    /// Discard everything and release all waiters
    pub fn abort(&self) {
        let mut inner = self.lock();
        inner.aborted = true;
        inner.packets.clear();
        inner.size_bytes = 0;
        drop(inner);
        self.available.notify_all();
    }

    /// Drop queued packets without closing the queue
    pub fn flush(&self) {
        let mut inner = self.lock();
        inner.packets.clear();
        inner.size_bytes = 0;
    }

    pub fn size_bytes(&self) -> usize {
        self.lock().size_bytes
    }

    pub fn len(&self) -> usize {
        self.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().packets.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        let inner = self.lock();
        inner.closed || inner.aborted
    }
}

impl std::fmt::Debug for BoundedPacketQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("BoundedPacketQueue")
            .field("name", &self.name)
            .field("len", &inner.packets.len())
            .field("size_bytes", &inner.size_bytes)
            .field("closed", &inner.closed)
            .field("aborted", &inner.aborted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn packet(id: i64, size: usize) -> Packet {
        Packet::new(0, vec![0u8; size], Some(id))
    }

    fn expect_packet(result: QueueGet) -> Packet {
        match result {
            QueueGet::Packet(p) => p,
            other => panic!("expected a packet, got {:?}", other),
        }
    }

    #[test]
    fn test_size_tracks_queued_packets() {
        let queue = BoundedPacketQueue::new("test");
        let sizes = [10usize, 0, 333, 7, 4096, 1];
        let mut expected = 0;

        for (i, &size) in sizes.iter().enumerate() {
            queue.put(packet(i as i64, size));
            expected += size;
            assert_eq!(queue.size_bytes(), expected);

            if i % 2 == 1 {
                let p = expect_packet(queue.get(false));
                expected -= p.size();
                assert_eq!(queue.size_bytes(), expected);
            }
        }

        while let QueueGet::Packet(p) = queue.get(false) {
            expected -= p.size();
            assert_eq!(queue.size_bytes(), expected);
        }
        assert_eq!(expected, 0);
        assert_eq!(queue.size_bytes(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let queue = BoundedPacketQueue::new("test");
        for i in 0..50 {
            queue.put(packet(i, 8));
        }
        for i in 0..50 {
            assert_eq!(expect_packet(queue.get(false)).pts, Some(i));
        }
        assert!(matches!(queue.get(false), QueueGet::Empty));
    }

    #[test]
    fn test_fifo_across_threads() {
        let queue = Arc::new(BoundedPacketQueue::new("test"));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..1000 {
                    queue.put(packet(i, (i % 17) as usize));
                }
                queue.close();
            })
        };

        let mut next = 0;
        loop {
            match queue.get(true) {
                QueueGet::Packet(p) => {
                    assert_eq!(p.pts, Some(next));
                    next += 1;
                }
                QueueGet::Closing => break,
                QueueGet::Empty => unreachable!("blocking get never reports empty"),
            }
        }
        producer.join().unwrap();
        assert_eq!(next, 1000);
        assert_eq!(queue.size_bytes(), 0);
    }

    #[test]
    fn test_close_drains_then_closes() {
        let queue = BoundedPacketQueue::new("test");
        queue.put(packet(1, 4));
        queue.put(packet(2, 4));
        queue.close();

        assert_eq!(expect_packet(queue.get(true)).pts, Some(1));
        assert_eq!(expect_packet(queue.get(true)).pts, Some(2));
        assert!(matches!(queue.get(true), QueueGet::Closing));
        assert!(matches!(queue.get(false), QueueGet::Closing));
    }

    #[test]
    fn test_abort_wakes_blocked_consumer() {
        let queue = Arc::new(BoundedPacketQueue::new("test"));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || matches!(queue.get(true), QueueGet::Closing))
        };

        thread::sleep(Duration::from_millis(30));
        let start = Instant::now();
        queue.abort();
        assert!(consumer.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_abort_discards_pending_and_later_packets() {
        let queue = BoundedPacketQueue::new("test");
        queue.put(packet(1, 100));
        queue.abort();
        assert_eq!(queue.size_bytes(), 0);

        queue.put(packet(2, 100));
        assert_eq!(queue.size_bytes(), 0);
        assert!(matches!(queue.get(false), QueueGet::Closing));
    }

    #[test]
    fn test_put_accepts_past_any_ceiling() {
        let queue = BoundedPacketQueue::new("test");
        for i in 0..64 {
            queue.put(packet(i, 1024 * 1024));
        }
        assert_eq!(queue.len(), 64);
        assert_eq!(queue.size_bytes(), 64 * 1024 * 1024);

        queue.flush();
        assert!(queue.is_empty());
        assert_eq!(queue.size_bytes(), 0);
        assert!(!queue.is_closed());
    }
}
