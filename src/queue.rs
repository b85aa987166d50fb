//! Bounded FIFO between frame extraction and the processing worker.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use anyhow::{anyhow, Result};

use crate::frame::Frame;

/// Fixed-capacity FIFO of frames awaiting dispatch.
///
/// The producer blocks when the queue is full: backpressure propagates to
/// the stream reader instead of dropping frames, so a slow consumer stalls
/// chunk consumption. The consumer side never blocks; the worker drains
/// until it observes empty and exits.
pub struct FrameQueue {
    items: Mutex<VecDeque<Frame>>,
    space: Condvar,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            space: Condvar::new(),
            capacity,
        }
    }

    /// Append a frame, waiting for space while the queue is at capacity.
    pub fn push_blocking(&self, frame: Frame) -> Result<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| anyhow!("frame queue lock poisoned"))?;
        while items.len() >= self.capacity {
            items = self
                .space
                .wait(items)
                .map_err(|_| anyhow!("frame queue lock poisoned"))?;
        }
        items.push_back(frame);
        Ok(())
    }

    /// Take the oldest frame, if any. Never blocks.
    pub fn pop(&self) -> Option<Frame> {
        let mut items = match self.items.lock() {
            Ok(items) => items,
            Err(_) => return None,
        };
        let frame = items.pop_front();
        if frame.is_some() {
            self.space.notify_one();
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
