//! Physical layer boundary.
//!
//! The transceiver driver, its interrupt-level receive FIFO and the
//! controller registers live outside this crate. What the service needs from
//! them is captured by [`BusPort`]:
//! - an exit point that places one frame on a module's bus line
//! - a way to drain frames the receive path has queued since the last loop
//!
//! A full transmit buffer is reported as [`CanError::BufferFull`] and is a
//! normal, transient condition on a saturated bus.
//!
//! # Examples
//!
//! ```rust
//! use carrier_can::data_link::Frame;
//! use carrier_can::error::{CanError, Result};
//! use carrier_can::physical::BusPort;
//! use carrier_can::types::{BusLine, ModuleId};
//!
//! /// One-slot mailbox per controller
//! #[derive(Default)]
//! struct Mailbox {
//!     slot: Option<Frame>,
//! }
//!
//! impl BusPort for Mailbox {
//!     fn place_on_bus(&mut self, _: ModuleId, _: BusLine, frame: &Frame) -> Result<()> {
//!         if self.slot.is_some() {
//!             return Err(CanError::BufferFull);
//!         }
//!         self.slot = Some(frame.clone());
//!         Ok(())
//!     }
//! }
//!
//! let mut port = Mailbox::default();
//! let frame = Frame::standard(0x100, &[1, 2, 3]).unwrap();
//! port.place_on_bus(ModuleId(0), BusLine::Can1, &frame).unwrap();
//! assert!(matches!(
//!     port.place_on_bus(ModuleId(0), BusLine::Can1, &frame),
//!     Err(CanError::BufferFull)
//! ));
//! assert!(port.poll_received().is_none());
//! ```
//!
//! [`CanError::BufferFull`]: crate::error::CanError::BufferFull

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use crate::data_link::Frame;
use crate::error::Result;
use crate::types::{BusLine, ModuleId};

/// A frame handed over by the receive path, tagged with where it arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub module: ModuleId,
    pub line: BusLine,
    pub frame: Frame,
}

/// Port trait that must be implemented by platform-specific code
pub trait BusPort: Send {
    /// Places a frame on the outgoing path of `module`/`line`
    fn place_on_bus(&mut self, module: ModuleId, line: BusLine, frame: &Frame) -> Result<()>;

    /// Next frame queued by the receive path, if any
    fn poll_received(&mut self) -> Option<ReceivedFrame> {
        None
    }
}

impl<P: BusPort + ?Sized> BusPort for Box<P> {
    fn place_on_bus(&mut self, module: ModuleId, line: BusLine, frame: &Frame) -> Result<()> {
        (**self).place_on_bus(module, line, frame)
    }

    fn poll_received(&mut self) -> Option<ReceivedFrame> {
        (**self).poll_received()
    }
}
