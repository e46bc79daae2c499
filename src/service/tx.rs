//! Transmit registrations and the per-tick throttler.
//!
//! A device driver registers each periodic message once, keeps the returned
//! [`TxHandle`] in its record and calls the throttler every control tick. The
//! registration owns the frame buffer; its identifier and length are fixed,
//! only the payload is re-encoded when a send is due.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::data_link::codec::WireEncode;
use crate::data_link::{Frame, IdKind, MAX_PAYLOAD};
use crate::error::{CanError, Result};
use crate::physical::BusPort;
use crate::types::{BusLine, CanId, DeviceInstance, ModuleId};

/// Index of a transmit registration inside its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle(usize);

/// Repeat interval of a periodic message, in control ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum TxInterval {
    #[default]
    EveryTick,
    Ticks(NonZeroU32),
}

impl TxInterval {
    /// 0 and 1 both mean every tick
    pub fn from_ticks(ticks: u32) -> Self {
        match NonZeroU32::new(ticks) {
            Some(n) if n.get() > 1 => TxInterval::Ticks(n),
            _ => TxInterval::EveryTick,
        }
    }

    pub fn ticks(&self) -> u32 {
        match self {
            TxInterval::EveryTick => 1,
            TxInterval::Ticks(n) => n.get(),
        }
    }
}

impl From<u32> for TxInterval {
    fn from(ticks: u32) -> Self {
        Self::from_ticks(ticks)
    }
}

impl From<TxInterval> for u32 {
    fn from(interval: TxInterval) -> Self {
        interval.ticks()
    }
}

/// Description of a periodic message
#[derive(Debug, Clone)]
pub struct TxSpec {
    pub device: DeviceInstance,
    pub module: ModuleId,
    pub line: BusLine,
    pub id: CanId,
    pub kind: IdKind,
    pub len: usize,
    pub interval: TxInterval,
    /// Send on the very first tick instead of waiting a full interval
    pub send_first_immediately: bool,
}

impl TxSpec {
    pub fn new(
        device: DeviceInstance,
        module: ModuleId,
        line: BusLine,
        id: CanId,
        kind: IdKind,
        len: usize,
    ) -> Self {
        Self {
            device,
            module,
            line,
            id,
            kind,
            len,
            interval: TxInterval::EveryTick,
            send_first_immediately: true,
        }
    }

    pub fn with_interval(mut self, interval: TxInterval) -> Self {
        self.interval = interval;
        self
    }

    pub fn wait_first_interval(mut self) -> Self {
        self.send_first_immediately = false;
        self
    }
}

/// Result of one throttler call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Frame placed on the bus
    Sent,
    /// Interval not yet elapsed
    Throttled,
    /// Send was due but the outgoing buffer was full; next attempt is one interval later
    BufferFull,
}

#[derive(Debug)]
struct TxEntry {
    device: DeviceInstance,
    module: ModuleId,
    line: BusLine,
    frame: Frame,
    counter: u32,
    interval: TxInterval,
    first_pending: bool,
    send_first_immediately: bool,
    has_sent: bool,
}

impl TxEntry {
    fn transmit<P, T>(&mut self, port: &mut P, source: &T) -> Result<TxOutcome>
    where
        P: BusPort + ?Sized,
        T: WireEncode + ?Sized,
    {
        self.frame.encode_from(source)?;
        match port.place_on_bus(self.module, self.line, &self.frame) {
            Ok(()) => {
                self.has_sent = true;
                trace!(id = self.frame.id(), device = %self.device, "frame sent");
                Ok(TxOutcome::Sent)
            }
            Err(CanError::BufferFull) => {
                debug!(
                    module = %self.module,
                    line = %self.line,
                    id = self.frame.id(),
                    "transmit buffer full, frame skipped"
                );
                Ok(TxOutcome::BufferFull)
            }
            Err(e) => Err(e),
        }
    }
}

/// Transmit registration table
#[derive(Debug)]
pub struct TxTable {
    entries: Vec<TxEntry>,
    capacity: usize,
}

impl TxTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn register(&mut self, spec: TxSpec) -> Result<TxHandle> {
        if spec.len > MAX_PAYLOAD {
            return Err(CanError::PayloadTooLong { len: spec.len });
        }
        if self.entries.len() >= self.capacity {
            return Err(CanError::OutOfCapacity {
                table: "transmit",
                capacity: self.capacity,
            });
        }
        let frame = Frame::new(spec.id, spec.kind, &[0u8; MAX_PAYLOAD][..spec.len])?;

        let handle = TxHandle(self.entries.len());
        debug!(
            module = %spec.module,
            line = %spec.line,
            id = spec.id,
            device = %spec.device,
            interval = spec.interval.ticks(),
            "registered transmit"
        );
        self.entries.push(TxEntry {
            device: spec.device,
            module: spec.module,
            line: spec.line,
            frame,
            counter: 0,
            interval: spec.interval,
            first_pending: true,
            send_first_immediately: spec.send_first_immediately,
            has_sent: false,
        });
        Ok(handle)
    }

    fn entry(&self, handle: TxHandle) -> Result<&TxEntry> {
        self.entries.get(handle.0).ok_or(CanError::NotFound)
    }

    fn entry_mut(&mut self, handle: TxHandle) -> Result<&mut TxEntry> {
        self.entries.get_mut(handle.0).ok_or(CanError::NotFound)
    }

    pub fn set_interval(&mut self, handle: TxHandle, interval: TxInterval) -> Result<()> {
        self.entry_mut(handle)?.interval = interval;
        Ok(())
    }

    pub fn interval(&self, handle: TxHandle) -> Result<TxInterval> {
        self.entry(handle).map(|e| e.interval)
    }

    /// Last frame built for this registration
    pub fn frame(&self, handle: TxHandle) -> Result<&Frame> {
        self.entry(handle).map(|e| &e.frame)
    }

    pub fn has_sent(&self, handle: TxHandle) -> Result<bool> {
        self.entry(handle).map(|e| e.has_sent)
    }

    /// Counts one tick and sends `source` when the interval has elapsed
    pub fn tick<P, T>(
        &mut self,
        port: &mut P,
        handle: TxHandle,
        interval: TxInterval,
        source: &T,
    ) -> Result<TxOutcome>
    where
        P: BusPort + ?Sized,
        T: WireEncode + ?Sized,
    {
        let entry = self.entry_mut(handle)?;
        entry.interval = interval;

        // Schedule state only advances once the attempt reached the port;
        // an encode or port error leaves the send due on the next tick.
        if entry.first_pending && entry.send_first_immediately {
            let outcome = entry.transmit(port, source)?;
            entry.first_pending = false;
            entry.counter = 0;
            return Ok(outcome);
        }
        entry.first_pending = false;

        let counter = entry.counter.saturating_add(1);
        if counter < entry.interval.ticks() {
            entry.counter = counter;
            return Ok(TxOutcome::Throttled);
        }
        let outcome = entry.transmit(port, source)?;
        entry.counter = 0;
        Ok(outcome)
    }

    /// Sends `source` now, outside the periodic schedule
    pub fn send_now<P, T>(&mut self, port: &mut P, handle: TxHandle, source: &T) -> Result<TxOutcome>
    where
        P: BusPort + ?Sized,
        T: WireEncode + ?Sized,
    {
        let entry = self.entry_mut(handle)?;
        let outcome = entry.transmit(port, source)?;
        entry.first_pending = false;
        Ok(outcome)
    }
}
