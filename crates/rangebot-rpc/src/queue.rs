//! Bounded outbound frame queue for the RPC client.

use std::collections::VecDeque;

/// Default number of frames held while the connection is down.
pub const DEFAULT_QUEUE_CAPACITY: usize = 250;

/// A serialized frame waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFrame {
    pub text: String,
    /// Request id whose caller waits on this frame, if any.
    pub pending_id: Option<u64>,
}

/// FIFO of unsent frames. At capacity the oldest frame is evicted and
/// returned so its caller can be rejected.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: VecDeque<QueuedFrame>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, frame: QueuedFrame) -> Option<QueuedFrame> {
        let evicted = if self.frames.len() >= self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    pub fn pop(&mut self) -> Option<QueuedFrame> {
        self.frames.pop_front()
    }

    /// Put unsent frames back ahead of everything queued since.
    ///
    /// Frames pushed past capacity are dropped from the back and returned.
    pub fn requeue_front(&mut self, frames: Vec<QueuedFrame>) -> Vec<QueuedFrame> {
        for frame in frames.into_iter().rev() {
            self.frames.push_front(frame);
        }
        let mut overflow = Vec::new();
        while self.frames.len() > self.capacity {
            if let Some(frame) = self.frames.pop_back() {
                overflow.push(frame);
            }
        }
        overflow
    }

    pub fn drain_all(&mut self) -> Vec<QueuedFrame> {
        self.frames.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
