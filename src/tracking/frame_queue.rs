//! Bounded single-producer/single-consumer frame queue.
//!
//! Backed by a lock-free `crossbeam` [`ArrayQueue`] and split into a
//! [`QueueProducer`] and a [`QueueConsumer`] so the one-writer/one-reader rule
//! is enforced by ownership: neither half is `Clone` and both methods take
//! `&mut self`.
//!
//! ```text
//!   producer ──try_push──► [ slot | slot | ... | slot ] ──try_pop──► consumer
//! ```

use super::frame::Frame;
use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

/// Capacity used by the orchestrator when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

pub type FrameProducer = QueueProducer<Frame>;
pub type FrameConsumer = QueueConsumer<Frame>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue capacity must be at least 1")]
    ZeroCapacity,
}

/// Creates a queue holding at most `capacity` items.
pub fn bounded<T: Send>(
    capacity: usize,
) -> Result<(QueueProducer<T>, QueueConsumer<T>), QueueError> {
    // ArrayQueue::new panics on zero
    if capacity == 0 {
        return Err(QueueError::ZeroCapacity);
    }

    let queue = Arc::new(ArrayQueue::new(capacity));
    Ok((
        QueueProducer {
            queue: queue.clone(),
        },
        QueueConsumer { queue },
    ))
}

pub struct QueueProducer<T> {
    queue: Arc<ArrayQueue<T>>,
}

impl<T: Send> QueueProducer<T> {
    /// Moves `value` into the queue. Hands it back if the queue is full.
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        self.queue.push(value)
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

pub struct QueueConsumer<T> {
    queue: Arc<ArrayQueue<T>>,
}

impl<T: Send> QueueConsumer<T> {
    /// Takes the oldest item, or `None` if the queue is empty.
    pub fn try_pop(&mut self) -> Option<T> {
        self.queue.pop()
    }

    /// Snapshot of the current occupancy.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn rejects_zero_capacity() {
        assert!(matches!(
            bounded::<u32>(0),
            Err(QueueError::ZeroCapacity)
        ));
    }

    #[test]
    fn push_past_capacity_fails_until_pop() {
        let (mut tx, mut rx) = bounded::<u32>(4).unwrap();
        for i in 0..4 {
            assert!(tx.try_push(i).is_ok(), "push {} should fit", i);
        }
        assert_eq!(tx.try_push(99), Err(99));
        assert_eq!(rx.len(), 4);

        assert_eq!(rx.try_pop(), Some(0));
        assert!(tx.try_push(4).is_ok());
        assert_eq!(tx.try_push(5), Err(5));
    }

    #[test]
    fn pops_in_fifo_order_across_wraparound() {
        let (mut tx, mut rx) = bounded::<u32>(3).unwrap();
        let mut expected = 0;
        for round in 0..10 {
            tx.try_push(round * 2).unwrap();
            tx.try_push(round * 2 + 1).unwrap();
            assert_eq!(rx.try_pop(), Some(expected));
            assert_eq!(rx.try_pop(), Some(expected + 1));
            expected += 2;
        }
        assert_eq!(rx.try_pop(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn transfers_frames_between_threads_in_order() {
        const COUNT: u64 = 20_000;
        let (mut tx, mut rx) = bounded::<Frame>(DEFAULT_QUEUE_CAPACITY).unwrap();

        let producer = thread::spawn(move || {
            for ts in 0..COUNT {
                let mut frame = Frame::new("SN1", ts, Vec::new());
                loop {
                    match tx.try_push(frame) {
                        Ok(()) => break,
                        Err(back) => {
                            frame = back;
                            thread::yield_now();
                        }
                    }
                }
            }
        });

        let mut next = 0;
        while next < COUNT {
            match rx.try_pop() {
                Some(frame) => {
                    assert_eq!(frame.timestamp, next);
                    assert_eq!(frame.device_id, "SN1");
                    next += 1;
                }
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert!(rx.try_pop().is_none());
    }
}
