//! One-shot delayed events
//!
//! `push_timer_event(delay, payload)` delivers `payload` on a channel once
//! `delay` has elapsed. A single worker thread serves every pending timer, so
//! re-arming the refresh scheduler never spawns a thread.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::workers::WorkerClose;

struct Pending<T> {
    deadline: Instant,
    seq: u64,
    payload: T,
}

// Reversed so the BinaryHeap pops the earliest deadline first
impl<T> Ord for Pending<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Pending<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Pending<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for Pending<T> {}

struct Shared<T> {
    queue: Mutex<Schedule<T>>,
    wakeup: Condvar,
}

struct Schedule<T> {
    heap: BinaryHeap<Pending<T>>,
    next_seq: u64,
    shutdown: bool,
}

pub struct EventTimer<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> EventTimer<T> {
    /// Start the timer thread; due events are sent to `sink`
    pub fn new(sink: Sender<T>) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Schedule {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });

        let handle = std::thread::Builder::new().name("event-timer".into()).spawn({
            let shared = Arc::clone(&shared);
            move || run(shared, sink)
        })?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    pub fn push_timer_event(&self, delay: Duration, payload: T) {
        let mut schedule = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let seq = schedule.next_seq;
        schedule.next_seq += 1;
        schedule.heap.push(Pending {
            deadline: Instant::now() + delay,
            seq,
            payload,
        });
        drop(schedule);
        self.shared.wakeup.notify_one();
    }

    /// Number of events not yet delivered
    pub fn pending(&self) -> usize {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .heap
            .len()
    }
}

fn run<T>(shared: Arc<Shared<T>>, sink: Sender<T>) {
    let mut schedule = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if schedule.shutdown {
            break;
        }

        let now = Instant::now();
        let next = schedule.heap.peek().map(|p| p.deadline);
        match next {
            Some(deadline) if deadline <= now => {
                let due = schedule.heap.pop();
                // Deliver without holding the lock
                drop(schedule);
                if let Some(due) = due
                    && sink.send(due.payload).is_err()
                {
                    log::debug!("EventTimer: receiver gone, stopping");
                    return;
                }
                schedule = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            }
            Some(deadline) => {
                schedule = shared
                    .wakeup
                    .wait_timeout(schedule, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            None => {
                schedule = shared
                    .wakeup
                    .wait(schedule)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}

impl<T: Send + 'static> WorkerClose for EventTimer<T> {
    fn close(&mut self) {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown = true;
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("EventTimer: timer thread panicked");
        }
    }
}

impl<T: Send + 'static> Drop for EventTimer<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_events_arrive_in_deadline_order() {
        let (tx, rx) = mpsc::channel();
        let timer = EventTimer::new(tx).unwrap();

        timer.push_timer_event(Duration::from_millis(60), "late");
        timer.push_timer_event(Duration::from_millis(10), "early");
        timer.push_timer_event(Duration::from_millis(30), "middle");

        let got: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, vec!["early", "middle", "late"]);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_delay_is_honoured() {
        let (tx, rx) = mpsc::channel();
        let timer = EventTimer::new(tx).unwrap();

        let start = Instant::now();
        timer.push_timer_event(Duration::from_millis(50), 1u32);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_close_drops_pending_events() {
        let (tx, rx) = mpsc::channel();
        let mut timer = EventTimer::new(tx).unwrap();
        timer.push_timer_event(Duration::from_secs(10), ());

        let start = Instant::now();
        timer.close();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
    }
}
