//! Bounded event queue between the acquisition thread and consumers.
//!
//! One producer pushes decoded events, any number of consumers pop them in
//! FIFO order. When the queue is full the [`OverflowPolicy`] decides whether
//! the producer waits or the oldest event is discarded. Closing the queue
//! wakes every blocked thread: producers get [`QueueClosed`], consumers drain
//! what is left and then see the end of the stream.

use crate::types::Event;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// What `push` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait for a consumer to make room (backpressure). Nothing is lost.
    #[default]
    Block,
    /// Evict the oldest queued event and count it as dropped.
    DropOldest,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "drop-oldest" | "drop_oldest" => Ok(Self::DropOldest),
            other => Err(format!(
                "unknown overflow policy: {}. Use block or drop-oldest",
                other
            )),
        }
    }
}

/// Returned by `push` once the queue has been closed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("event queue is closed")]
pub struct QueueClosed;

/// Outcome of a non-blocking or timed pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv {
    Event(Event),
    /// Nothing available yet; the stream is still open.
    Empty,
    /// The queue is closed and drained.
    EndOfStream,
}

#[derive(Debug)]
struct State {
    items: VecDeque<Event>,
    closed: bool,
}

/// Bounded, thread-safe FIFO of events.
#[derive(Debug)]
pub struct EventQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

impl EventQueue {
    /// Creates a queue holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(1 << 16)),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Total events evicted under `DropOldest`. Never decreases.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Appends one event, applying the overflow policy when full.
    pub fn push(&self, event: Event) -> Result<(), QueueClosed> {
        let mut state = self.state.lock();
        self.push_locked(&mut state, event)?;
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Appends a batch of events in order.
    ///
    /// Consumers are woken as events become available, so a batch larger
    /// than the capacity does not deadlock in `Block` mode.
    pub fn push_batch<I>(&self, events: I) -> Result<(), QueueClosed>
    where
        I: IntoIterator<Item = Event>,
    {
        let mut state = self.state.lock();
        let mut pushed = 0usize;
        for event in events {
            // Announce this batch's events before waiting for room
            if pushed > 0
                && self.policy == OverflowPolicy::Block
                && state.items.len() >= self.capacity
            {
                self.not_empty.notify_all();
            }
            self.push_locked(&mut state, event)?;
            pushed += 1;
        }
        drop(state);
        if pushed > 0 {
            self.not_empty.notify_all();
        }
        Ok(())
    }

    fn push_locked(
        &self,
        state: &mut parking_lot::MutexGuard<'_, State>,
        event: Event,
    ) -> Result<(), QueueClosed> {
        if state.closed {
            return Err(QueueClosed);
        }
        if state.items.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::Block => {
                    while state.items.len() >= self.capacity && !state.closed {
                        self.not_full.wait(state);
                    }
                    if state.closed {
                        return Err(QueueClosed);
                    }
                }
                OverflowPolicy::DropOldest => {
                    state.items.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        state.items.push_back(event);
        Ok(())
    }

    /// Removes the oldest event, blocking until one is available.
    ///
    /// Returns `None` once the queue is closed and every queued event has
    /// been delivered.
    pub fn pop(&self) -> Option<Event> {
        let mut state = self.state.lock();
        loop {
            if let Some(event) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(event);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Removes the oldest event without blocking.
    pub fn try_pop(&self) -> Recv {
        let mut state = self.state.lock();
        match state.items.pop_front() {
            Some(event) => {
                drop(state);
                self.not_full.notify_one();
                Recv::Event(event)
            }
            None if state.closed => Recv::EndOfStream,
            None => Recv::Empty,
        }
    }

    /// Like `pop`, but gives up after `timeout` with `Recv::Empty`.
    pub fn pop_timeout(&self, timeout: Duration) -> Recv {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(event) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Recv::Event(event);
            }
            if state.closed {
                return Recv::EndOfStream;
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return match state.items.pop_front() {
                    Some(event) => {
                        drop(state);
                        self.not_full.notify_one();
                        Recv::Event(event)
                    }
                    None if state.closed => Recv::EndOfStream,
                    None => Recv::Empty,
                };
            }
        }
    }

    /// Closes the queue and wakes all waiting producers and consumers.
    /// Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Polarity;
    use std::str::FromStr;
    use std::sync::Arc;
    use std::thread;

    fn ev(t: u64) -> Event {
        Event::cd(0, 0, Polarity::On, t)
    }

    #[test]
    fn test_fifo_order_and_end_of_stream() {
        let queue = EventQueue::new(8, OverflowPolicy::Block);
        for t in 0..3 {
            queue.push(ev(t)).unwrap();
        }
        queue.close();

        assert_eq!(queue.pop(), Some(ev(0)));
        assert_eq!(queue.pop(), Some(ev(1)));
        assert_eq!(queue.pop(), Some(ev(2)));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.try_pop(), Recv::EndOfStream);
    }

    #[test]
    fn test_push_after_close_fails() {
        let queue = EventQueue::new(2, OverflowPolicy::Block);
        queue.close();
        queue.close();
        assert_eq!(queue.push(ev(0)), Err(QueueClosed));
        assert!(queue.is_closed());
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let queue = EventQueue::new(3, OverflowPolicy::DropOldest);
        let mut last_dropped = 0;
        for t in 0..10 {
            queue.push(ev(t)).unwrap();
            assert!(queue.len() <= 3);
            assert!(queue.dropped() >= last_dropped);
            last_dropped = queue.dropped();
        }
        assert_eq!(queue.dropped(), 7);
        assert_eq!(queue.try_pop(), Recv::Event(ev(7)));
        assert_eq!(queue.try_pop(), Recv::Event(ev(8)));
        assert_eq!(queue.try_pop(), Recv::Event(ev(9)));
        assert_eq!(queue.try_pop(), Recv::Empty);
    }

    #[test]
    fn test_capacity_floor() {
        let queue = EventQueue::new(0, OverflowPolicy::DropOldest);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_block_mode_never_drops() {
        let queue = Arc::new(EventQueue::new(4, OverflowPolicy::Block));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue.push_batch((0..500).map(ev)).unwrap();
                queue.close();
            })
        };

        let mut received = Vec::new();
        while let Some(event) = queue.pop() {
            assert!(queue.len() <= 4);
            received.push(event.timestamp);
        }
        producer.join().unwrap();

        assert_eq!(received, (0..500).collect::<Vec<_>>());
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn test_batch_larger_than_capacity_wakes_waiting_consumer() {
        let queue = Arc::new(EventQueue::new(2, OverflowPolicy::Block));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut received = Vec::new();
                while let Some(event) = queue.pop() {
                    received.push(event.timestamp);
                }
                received
            })
        };

        // the consumer is already parked in pop when the batch starts
        thread::sleep(Duration::from_millis(20));
        queue.push_batch((0..50).map(ev)).unwrap();
        queue.push_batch(std::iter::empty()).unwrap();
        queue.close();

        assert_eq!(consumer.join().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let queue = Arc::new(EventQueue::new(1, OverflowPolicy::Block));
        queue.push(ev(0)).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(ev(1)))
        };
        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert_eq!(producer.join().unwrap(), Err(QueueClosed));
        // the queued event is still delivered
        assert_eq!(queue.pop(), Some(ev(0)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_close_wakes_blocked_consumers() {
        let queue = Arc::new(EventQueue::new(4, OverflowPolicy::Block));
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.pop())
            })
            .collect();
        thread::sleep(Duration::from_millis(50));
        queue.close();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn test_pop_timeout() {
        let queue = EventQueue::new(4, OverflowPolicy::Block);
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)), Recv::Empty);
        queue.push(ev(5)).unwrap();
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)), Recv::Event(ev(5)));
        queue.close();
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(10)),
            Recv::EndOfStream
        );
    }

    #[test]
    fn test_overflow_policy_parsing() {
        assert_eq!(OverflowPolicy::from_str("block"), Ok(OverflowPolicy::Block));
        assert_eq!(
            OverflowPolicy::from_str("Drop-Oldest"),
            Ok(OverflowPolicy::DropOldest)
        );
        assert!(OverflowPolicy::from_str("spill").is_err());
    }
}
