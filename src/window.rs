use std::collections::VecDeque;

use crate::frame::Frame;

/// The most recent frames of a session, oldest first, bounded to a fixed
/// capacity.
#[derive(Debug)]
pub struct FrameWindow {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be positive");
        Self {
            frames: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a frame, dropping the oldest ones so that at most `capacity`
    /// frames remain. Returns how many frames were evicted.
    pub fn push(&mut self, frame: Frame) -> usize {
        self.frames.push_back(frame);
        let mut evicted = 0;
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Replace the contents with a single frame
    pub fn restart(&mut self, frame: Frame) {
        self.frames.clear();
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// The frames in arrival order as one contiguous batch
    pub fn as_batch(&mut self) -> &[Frame] {
        self.frames.make_contiguous()
    }
}
