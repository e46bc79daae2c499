//! Receive registrations, dispatch and liveness supervision.
//!
//! Every registration is keyed by module, bus line and identifier, and
//! optionally by a discriminator byte (the first payload byte). The two
//! forms are separate keyspaces: a frame is matched against the
//! discriminator keyspace first and falls back to the plain one, so one
//! identifier can carry several multiplexed sub-messages while simple
//! identifiers register without a discriminator.
//!
//! Each registration carries a [`Liveness`] counter. The supervisor bumps it
//! every control tick; once it reaches the registration's [`TimeoutLimit`]
//! the handler's `on_timeout` runs once and the counter latches until the
//! next successful receive.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::data_link::Frame;
use crate::error::{CanError, Result};
use crate::types::{BusLine, CanId, DeviceInstance, ModuleId};

use super::TimeoutPolicy;

/// Identity of a receive registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RxKey {
    pub module: ModuleId,
    pub line: BusLine,
    pub id: CanId,
    pub discriminator: Option<u8>,
}

impl RxKey {
    pub fn plain(module: ModuleId, line: BusLine, id: CanId) -> Self {
        Self {
            module,
            line,
            id,
            discriminator: None,
        }
    }

    pub fn discriminated(module: ModuleId, line: BusLine, id: CanId, discriminator: u8) -> Self {
        Self {
            module,
            line,
            id,
            discriminator: Some(discriminator),
        }
    }
}

impl fmt::Display for RxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} id={:#x}", self.module, self.line, self.id)?;
        if let Some(byte) = self.discriminator {
            write!(f, " mux={:#04x}", byte)?;
        }
        Ok(())
    }
}

/// Index of a receive registration inside its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RxHandle(usize);

/// Number of supervisor ticks without a receive before a registration times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum TimeoutLimit {
    #[default]
    Disarmed,
    Ticks(NonZeroU32),
}

impl TimeoutLimit {
    /// 0 disarms the timeout
    pub fn from_ticks(ticks: u32) -> Self {
        match NonZeroU32::new(ticks) {
            Some(n) => TimeoutLimit::Ticks(n),
            None => TimeoutLimit::Disarmed,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, TimeoutLimit::Ticks(_))
    }
}

impl From<u32> for TimeoutLimit {
    fn from(ticks: u32) -> Self {
        Self::from_ticks(ticks)
    }
}

impl From<TimeoutLimit> for u32 {
    fn from(limit: TimeoutLimit) -> Self {
        match limit {
            TimeoutLimit::Disarmed => 0,
            TimeoutLimit::Ticks(n) => n.get(),
        }
    }
}

/// Per-registration liveness counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Liveness {
    count: u32,
    timed_out: bool,
}

impl Liveness {
    /// Ticks since the last successful receive
    pub fn count(&self) -> u32 {
        self.count
    }

    /// True while latched in the timed-out state
    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// Marks the registration alive again
    pub fn reset(&mut self) {
        self.count = 0;
        self.timed_out = false;
    }

    // Returns true on the tick the limit is reached
    fn tick(&mut self, limit: TimeoutLimit) -> bool {
        if self.timed_out {
            return false;
        }
        self.count = self.count.saturating_add(1);
        match limit {
            TimeoutLimit::Disarmed => false,
            TimeoutLimit::Ticks(n) if self.count >= n.get() => {
                self.timed_out = true;
                true
            }
            TimeoutLimit::Ticks(_) => false,
        }
    }
}

/// Callbacks a device driver attaches to a receive registration
pub trait RxHandler: Send {
    /// Called for every frame matching the registration
    ///
    /// Returning `Ok` marks the registration alive once the call returns; an
    /// error leaves the liveness counter untouched and is handed back to the
    /// dispatcher's caller.
    fn on_receive(
        &mut self,
        device: DeviceInstance,
        frame: &Frame,
        liveness: &mut Liveness,
    ) -> Result<()>;

    /// Called once when the registration's timeout limit is reached
    fn on_timeout(&mut self, _device: DeviceInstance, _key: &RxKey) {}
}

/// Closure-backed [`RxHandler`], built with [`rx_fn`]
pub struct FnHandler<R, T> {
    receive: R,
    timeout: T,
}

fn ignore_timeout(_: DeviceInstance, _: &RxKey) {}

/// Builds a handler from a receive closure
pub fn rx_fn<R>(receive: R) -> FnHandler<R, fn(DeviceInstance, &RxKey)>
where
    R: FnMut(DeviceInstance, &Frame) -> Result<()> + Send,
{
    FnHandler {
        receive,
        timeout: ignore_timeout,
    }
}

impl<R, T> FnHandler<R, T> {
    /// Attaches a timeout closure
    pub fn with_timeout<T2>(self, timeout: T2) -> FnHandler<R, T2>
    where
        T2: FnMut(DeviceInstance, &RxKey) + Send,
    {
        FnHandler {
            receive: self.receive,
            timeout,
        }
    }
}

impl<R, T> RxHandler for FnHandler<R, T>
where
    R: FnMut(DeviceInstance, &Frame) -> Result<()> + Send,
    T: FnMut(DeviceInstance, &RxKey) + Send,
{
    fn on_receive(&mut self, device: DeviceInstance, frame: &Frame, _: &mut Liveness) -> Result<()> {
        (self.receive)(device, frame)
    }

    fn on_timeout(&mut self, device: DeviceInstance, key: &RxKey) {
        (self.timeout)(device, key)
    }
}

/// Result of dispatching one received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Matched a discriminator-keyed registration
    Discriminated(RxHandle),
    /// Matched a plain registration
    Plain(RxHandle),
    /// No registration wants this frame
    Unmatched,
}

struct RxEntry {
    key: RxKey,
    device: DeviceInstance,
    handler: Box<dyn RxHandler>,
    liveness: Liveness,
    limit: TimeoutLimit,
}

/// Receive registration table
pub struct RxTable {
    entries: Vec<RxEntry>,
    index: HashMap<RxKey, RxHandle>,
    capacity: usize,
    default_timeout: TimeoutLimit,
}

impl RxTable {
    pub fn new(capacity: usize, default_timeout: TimeoutLimit) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            capacity,
            default_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn register(
        &mut self,
        key: RxKey,
        device: DeviceInstance,
        handler: Box<dyn RxHandler>,
    ) -> Result<RxHandle> {
        if self.index.contains_key(&key) {
            return Err(CanError::DuplicateRegistration(key));
        }
        if self.entries.len() >= self.capacity {
            return Err(CanError::OutOfCapacity {
                table: "receive",
                capacity: self.capacity,
            });
        }

        let handle = RxHandle(self.entries.len());
        self.entries.push(RxEntry {
            key,
            device,
            handler,
            liveness: Liveness::default(),
            limit: self.default_timeout,
        });
        self.index.insert(key, handle);
        debug!(%key, %device, "registered receive");
        Ok(handle)
    }

    pub fn find(&self, key: &RxKey) -> Option<RxHandle> {
        self.index.get(key).copied()
    }

    fn entry(&self, handle: RxHandle) -> Result<&RxEntry> {
        self.entries.get(handle.0).ok_or(CanError::NotFound)
    }

    fn entry_mut(&mut self, handle: RxHandle) -> Result<&mut RxEntry> {
        self.entries.get_mut(handle.0).ok_or(CanError::NotFound)
    }

    pub fn key(&self, handle: RxHandle) -> Result<RxKey> {
        self.entry(handle).map(|e| e.key)
    }

    pub fn set_timeout_limit(&mut self, handle: RxHandle, limit: TimeoutLimit) -> Result<()> {
        let entry = self.entry_mut(handle)?;
        entry.limit = limit;
        if !limit.is_armed() {
            entry.liveness.timed_out = false;
        }
        Ok(())
    }

    pub fn timeout_limit(&self, handle: RxHandle) -> Result<TimeoutLimit> {
        self.entry(handle).map(|e| e.limit)
    }

    pub fn timeout_status(&self, handle: RxHandle) -> Result<bool> {
        self.entry(handle).map(|e| e.liveness.timed_out)
    }

    pub fn liveness(&self, handle: RxHandle) -> Result<Liveness> {
        self.entry(handle).map(|e| e.liveness)
    }

    fn match_frame(&self, frame: &Frame, module: ModuleId, line: BusLine) -> DispatchOutcome {
        if let Some(byte) = frame.discriminator() {
            let key = RxKey::discriminated(module, line, frame.id(), byte);
            if let Some(handle) = self.find(&key) {
                return DispatchOutcome::Discriminated(handle);
            }
        }
        match self.find(&RxKey::plain(module, line, frame.id())) {
            Some(handle) => DispatchOutcome::Plain(handle),
            None => DispatchOutcome::Unmatched,
        }
    }

    /// Routes one received frame to its registration
    pub fn dispatch(
        &mut self,
        frame: &Frame,
        module: ModuleId,
        line: BusLine,
    ) -> Result<DispatchOutcome> {
        let outcome = self.match_frame(frame, module, line);
        let handle = match outcome {
            DispatchOutcome::Discriminated(handle) | DispatchOutcome::Plain(handle) => handle,
            DispatchOutcome::Unmatched => {
                trace!(%module, %line, id = frame.id(), "unmatched frame dropped");
                return Ok(outcome);
            }
        };

        let entry = self.entry_mut(handle)?;
        let was_timed_out = entry.liveness.timed_out;
        if let Err(e) = entry
            .handler
            .on_receive(entry.device, frame, &mut entry.liveness)
        {
            warn!(key = %entry.key, device = %entry.device, error = %e, "receive handler failed");
            return Err(e);
        }
        entry.liveness.reset();
        if was_timed_out {
            info!(key = %entry.key, device = %entry.device, "receive recovered from timeout");
        }
        trace!(key = %entry.key, "frame dispatched");
        Ok(outcome)
    }

    /// One supervisor pass; returns the number of timeout callbacks fired
    pub fn supervise(&mut self, policy: TimeoutPolicy) -> usize {
        let mut fired = 0;
        for entry in self.entries.iter_mut() {
            if !entry.liveness.tick(entry.limit) {
                continue;
            }
            warn!(
                key = %entry.key,
                device = %entry.device,
                ticks = entry.liveness.count,
                "receive timed out"
            );
            entry.handler.on_timeout(entry.device, &entry.key);
            fired += 1;
            if policy == TimeoutPolicy::OnePerTick {
                break;
            }
        }
        fired
    }
}
