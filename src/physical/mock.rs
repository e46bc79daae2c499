use std::collections::VecDeque;

use super::{BusPort, ReceivedFrame};
use crate::data_link::Frame;
use crate::error::{CanError, Result};
use crate::types::{BusLine, ModuleId};

/// Mock bus for testing
///
/// Records every frame placed on it. With a transmit capacity set, frames
/// beyond the capacity are refused with `BufferFull` until [`drain`] is
/// called, mimicking a saturated hardware mailbox.
///
/// [`drain`]: MockBus::drain
#[derive(Debug, Default)]
pub struct MockBus {
    sent: Vec<ReceivedFrame>,
    pending: usize,
    tx_capacity: Option<usize>,
    inbound: VecDeque<ReceivedFrame>,
    fail_with: Option<String>,
}

impl MockBus {
    /// Creates a mock bus with an unbounded transmit path
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock bus whose transmit path holds at most `capacity` frames
    pub fn with_tx_capacity(capacity: usize) -> Self {
        Self {
            tx_capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Creates a mock bus that fails every transmit with a port error
    pub fn new_error(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Makes every following transmit fail with a port error, or succeed again with `None`
    pub fn set_error(&mut self, message: Option<&str>) {
        self.fail_with = message.map(str::to_string);
    }

    /// Queues a frame for the next `poll_received`
    pub fn inject(&mut self, module: ModuleId, line: BusLine, frame: Frame) {
        self.inbound.push_back(ReceivedFrame {
            module,
            line,
            frame,
        });
    }

    /// Frames placed on the bus so far
    pub fn sent(&self) -> &[ReceivedFrame] {
        &self.sent
    }

    /// Frames with `id` placed on the bus so far
    pub fn sent_with_id(&self, id: u32) -> Vec<&Frame> {
        self.sent
            .iter()
            .filter(|s| s.frame.id() == id)
            .map(|s| &s.frame)
            .collect()
    }

    /// Empties the simulated transmit buffer
    pub fn drain(&mut self) {
        self.pending = 0;
    }

    pub fn clear(&mut self) {
        self.sent.clear();
        self.pending = 0;
    }
}

impl BusPort for MockBus {
    fn place_on_bus(&mut self, module: ModuleId, line: BusLine, frame: &Frame) -> Result<()> {
        if let Some(message) = &self.fail_with {
            return Err(CanError::Port(message.clone()));
        }
        if let Some(capacity) = self.tx_capacity {
            if self.pending >= capacity {
                return Err(CanError::BufferFull);
            }
        }
        self.pending += 1;
        self.sent.push(ReceivedFrame {
            module,
            line,
            frame: frame.clone(),
        });
        Ok(())
    }

    fn poll_received(&mut self) -> Option<ReceivedFrame> {
        self.inbound.pop_front()
    }
}
