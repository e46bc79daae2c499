//! CAN registration and dispatch service.
//!
//! [`CanService`] is the context object every device driver is initialised
//! against. It owns the bus port, the receive registration table and the
//! transmit registration table, and is driven from the control loop:
//!
//! ```text
//! every tick:
//!     service.process_received()?;        // dispatch queued frames
//!     service.tick_liveness_supervisor(); // fire receive timeouts
//!     driver.send(&mut service)?;         // each driver throttles its messages
//! ```
//!
//! All operations take `&mut self` and run to completion; nothing blocks.
//! Hosts that service ports from several threads wrap the service in a mutex.
//!
//! # Examples
//!
//! ```rust
//! use carrier_can::data_link::Frame;
//! use carrier_can::physical::BusPort;
//! use carrier_can::service::{rx_fn, CanService, DispatchOutcome, RxKey, ServiceConfig};
//! use carrier_can::types::{BusLine, DeviceInstance, ModuleId};
//! # use carrier_can::error::Result;
//! # struct NullBus;
//! # impl BusPort for NullBus {
//! #     fn place_on_bus(&mut self, _: ModuleId, _: BusLine, _: &Frame) -> Result<()> { Ok(()) }
//! # }
//!
//! let mut service = CanService::new(ServiceConfig::default(), NullBus).unwrap();
//! let key = RxKey::plain(ModuleId(0), BusLine::Can1, 0x100);
//! service
//!     .register_receive(key, DeviceInstance(0), rx_fn(|_, _| Ok(())))
//!     .unwrap();
//!
//! let frame = Frame::standard(0x100, &[1, 2]).unwrap();
//! let outcome = service.dispatch(&frame, ModuleId(0), BusLine::Can1).unwrap();
//! assert!(matches!(outcome, DispatchOutcome::Plain(_)));
//! ```

pub mod rx;
pub mod tx;


use serde::{Deserialize, Serialize};

use crate::data_link::codec::WireEncode;
use crate::data_link::Frame;
use crate::error::{CanError, Result};
use crate::physical::BusPort;
use crate::types::{BusLine, Config, DeviceInstance, ModuleId};

pub use rx::{
    rx_fn, DispatchOutcome, FnHandler, Liveness, RxHandle, RxHandler, RxKey, RxTable,
    TimeoutLimit,
};
pub use tx::{TxHandle, TxInterval, TxOutcome, TxSpec, TxTable};

/// How many newly timed-out registrations a supervisor pass reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Every stale registration is reported on the tick it goes stale
    #[default]
    AllPerTick,
    /// The pass stops at the first newly timed-out registration; later
    /// registrations are not counted on that tick
    OnePerTick,
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub rx_capacity: usize,
    pub tx_capacity: usize,
    pub default_timeout: TimeoutLimit,
    pub timeout_policy: TimeoutPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            rx_capacity: 64,
            tx_capacity: 32,
            default_timeout: TimeoutLimit::Disarmed,
            timeout_policy: TimeoutPolicy::AllPerTick,
        }
    }
}

impl Config for ServiceConfig {
    fn validate(&self) -> Result<()> {
        if self.rx_capacity == 0 {
            return Err(CanError::InvalidParameter("rx_capacity must be non-zero"));
        }
        if self.tx_capacity == 0 {
            return Err(CanError::InvalidParameter("tx_capacity must be non-zero"));
        }
        Ok(())
    }
}

/// Running counters of service activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub dispatched: u64,
    pub unmatched: u64,
    pub handler_errors: u64,
    pub timeouts: u64,
    pub sent: u64,
    pub throttled: u64,
    pub buffer_full: u64,
}

/// CAN registration and dispatch context
pub struct CanService<P: BusPort> {
    config: ServiceConfig,
    port: P,
    rx: RxTable,
    tx: TxTable,
    stats: ServiceStats,
}

impl<P: BusPort> CanService<P> {
    /// Creates a service with the given port
    pub fn new(config: ServiceConfig, port: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            rx: RxTable::new(config.rx_capacity, config.default_timeout),
            tx: TxTable::new(config.tx_capacity),
            config,
            port,
            stats: ServiceStats::default(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats
    }

    pub fn rx_table(&self) -> &RxTable {
        &self.rx
    }

    pub fn tx_table(&self) -> &TxTable {
        &self.tx
    }

    // Receive side

    pub fn register_receive<H>(
        &mut self,
        key: RxKey,
        device: DeviceInstance,
        handler: H,
    ) -> Result<RxHandle>
    where
        H: RxHandler + 'static,
    {
        self.rx.register(key, device, Box::new(handler))
    }

    pub fn find_receive(&self, key: &RxKey) -> Option<RxHandle> {
        self.rx.find(key)
    }

    pub fn set_timeout_limit(&mut self, key: &RxKey, limit: TimeoutLimit) -> Result<()> {
        let handle = self.rx.find(key).ok_or(CanError::NotFound)?;
        self.rx.set_timeout_limit(handle, limit)
    }

    /// True only while the registration is latched in the timed-out state
    pub fn timeout_status(&self, key: &RxKey) -> Result<bool> {
        let handle = self.rx.find(key).ok_or(CanError::NotFound)?;
        self.rx.timeout_status(handle)
    }

    pub fn liveness(&self, key: &RxKey) -> Result<Liveness> {
        let handle = self.rx.find(key).ok_or(CanError::NotFound)?;
        self.rx.liveness(handle)
    }

    /// Routes one received frame to the matching registration
    pub fn dispatch(
        &mut self,
        frame: &Frame,
        module: ModuleId,
        line: BusLine,
    ) -> Result<DispatchOutcome> {
        match self.rx.dispatch(frame, module, line) {
            Ok(DispatchOutcome::Unmatched) => {
                self.stats.unmatched += 1;
                Ok(DispatchOutcome::Unmatched)
            }
            Ok(outcome) => {
                self.stats.dispatched += 1;
                Ok(outcome)
            }
            Err(e) => {
                self.stats.handler_errors += 1;
                Err(e)
            }
        }
    }

    /// Dispatches every frame the port has queued; returns how many were drained
    ///
    /// A handler error does not stop the drain; the first one is returned after
    /// the queue is empty.
    pub fn process_received(&mut self) -> Result<usize> {
        let mut drained = 0;
        let mut first_error = None;
        while let Some(received) = self.port.poll_received() {
            drained += 1;
            if let Err(e) = self.dispatch(&received.frame, received.module, received.line) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(drained),
        }
    }

    /// One liveness pass; returns the number of timeout callbacks fired
    pub fn tick_liveness_supervisor(&mut self) -> usize {
        let fired = self.rx.supervise(self.config.timeout_policy);
        self.stats.timeouts += fired as u64;
        fired
    }

    // Transmit side

    pub fn register_transmit(&mut self, spec: TxSpec) -> Result<TxHandle> {
        self.tx.register(spec)
    }

    pub fn set_interval(&mut self, handle: TxHandle, interval: TxInterval) -> Result<()> {
        self.tx.set_interval(handle, interval)
    }

    /// Throttled periodic send, called once per control tick by the owning driver
    pub fn tick_transmit<T>(
        &mut self,
        handle: TxHandle,
        interval: TxInterval,
        source: &T,
    ) -> Result<TxOutcome>
    where
        T: WireEncode + ?Sized,
    {
        let outcome = self.tx.tick(&mut self.port, handle, interval, source)?;
        self.count_tx(outcome);
        Ok(outcome)
    }

    /// Unthrottled send for on-demand messages
    pub fn send_now<T>(&mut self, handle: TxHandle, source: &T) -> Result<TxOutcome>
    where
        T: WireEncode + ?Sized,
    {
        let outcome = self.tx.send_now(&mut self.port, handle, source)?;
        self.count_tx(outcome);
        Ok(outcome)
    }

    fn count_tx(&mut self, outcome: TxOutcome) {
        match outcome {
            TxOutcome::Sent => self.stats.sent += 1,
            TxOutcome::Throttled => self.stats.throttled += 1,
            TxOutcome::BufferFull => self.stats.buffer_full += 1,
        }
    }
}
