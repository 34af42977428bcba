//! Control message delay line
//!
//! Messages queued by the MAC wait `L1L2 latency` slots before they can be
//! sent. The queue holds one bucket per slot of delay plus the current one and
//! rotates once per slot.

use interfaces::message_types::ControlMessage;
use std::collections::VecDeque;
use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct ControlMessageQueue {
    buckets: VecDeque<Vec<ControlMessage>>,
}

impl ControlMessageQueue {
    /// Queue with `latency + 1` empty buckets
    pub fn new(latency: u32) -> Self {
        let mut queue = Self::default();
        queue.initialize(latency);
        queue
    }

    /// Drop every pending message and reset the depth to `latency + 1`
    pub fn initialize(&mut self, latency: u32) {
        self.buckets.clear();
        self.buckets.resize_with(latency as usize + 1, Vec::new);
    }

    /// Number of buckets
    pub fn depth(&self) -> usize {
        self.buckets.len()
    }

    /// Queue with full latency
    pub fn enqueue(&mut self, msg: ControlMessage) {
        trace!("Enqueue {:?} with full latency", msg.message_type());
        if let Some(last) = self.buckets.back_mut() {
            last.push(msg);
        }
    }

    /// Queue for the current slot
    pub fn enqueue_now(&mut self, msg: ControlMessage) {
        trace!("Enqueue {:?} for the current slot", msg.message_type());
        if self.buckets.is_empty() {
            self.buckets.push_back(Vec::new());
        }
        if let Some(first) = self.buckets.front_mut() {
            first.push(msg);
        }
    }

    pub fn enqueue_now_all(&mut self, msgs: impl IntoIterator<Item = ControlMessage>) {
        for msg in msgs {
            self.enqueue_now(msg);
        }
    }

    /// Take the messages due in this slot and shift the line by one slot
    pub fn pop_current(&mut self) -> Vec<ControlMessage> {
        let current = self.buckets.pop_front().unwrap_or_default();
        self.buckets.push_back(Vec::new());
        current
    }

    /// True if nothing is due in the current slot
    pub fn is_current_empty(&self) -> bool {
        self.buckets.front().map_or(true, Vec::is_empty)
    }

    /// Messages still waiting, over all buckets
    pub fn pending(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}
