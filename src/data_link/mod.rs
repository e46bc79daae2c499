//! Data link layer: the wire-level CAN frame.
//!
//! A [`Frame`] is what the dispatcher receives and what transmit
//! registrations place on the bus. Payloads are stored inline (at most 8
//! bytes, classic CAN), so building a frame never allocates.
//!
//! Multi-byte signal values inside a payload are converted by [`codec`];
//! nothing outside that module swaps bytes.
//!
//! # Examples
//!
//! ```rust
//! use carrier_can::data_link::{Frame, IdKind};
//!
//! let frame = Frame::standard(0x100, &[0x05, 0x10, 0x27]).unwrap();
//! assert_eq!(frame.kind(), IdKind::Standard);
//! assert_eq!(frame.discriminator(), Some(0x05));
//! ```

pub mod codec;


use bitflags::bitflags;
use heapless::Vec;

use crate::error::{CanError, Result};
use crate::types::{CanId, Timestamp};

/// Maximum payload of a classic CAN frame
pub const MAX_PAYLOAD: usize = 8;

/// Largest 11-bit identifier
pub const STANDARD_ID_MAX: CanId = 0x7FF;

/// Largest 29-bit identifier
pub const EXTENDED_ID_MAX: CanId = 0x1FFF_FFFF;

/// Frame payload storage
pub type Payload = Vec<u8, MAX_PAYLOAD>;

/// Identifier width class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Standard, // 11-bit
    Extended, // 29-bit
}

impl IdKind {
    pub fn max_id(self) -> CanId {
        match self {
            IdKind::Standard => STANDARD_ID_MAX,
            IdKind::Extended => EXTENDED_ID_MAX,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        const REMOTE = 1;
    }
}

/// A single CAN frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    id: CanId,
    kind: IdKind,
    payload: Payload,
    flags: FrameFlags,
    timestamp: Timestamp,
}

impl Frame {
    /// Creates a data frame, checking identifier width and payload length
    pub fn new(id: CanId, kind: IdKind, data: &[u8]) -> Result<Self> {
        if id > kind.max_id() {
            return Err(CanError::InvalidIdentifier { id, kind });
        }
        let payload =
            Payload::from_slice(data).map_err(|_| CanError::PayloadTooLong { len: data.len() })?;

        Ok(Self {
            id,
            kind,
            payload,
            flags: FrameFlags::empty(),
            timestamp: 0,
        })
    }

    pub fn standard(id: CanId, data: &[u8]) -> Result<Self> {
        Self::new(id, IdKind::Standard, data)
    }

    pub fn extended(id: CanId, data: &[u8]) -> Result<Self> {
        Self::new(id, IdKind::Extended, data)
    }

    /// Creates a remote-request frame asking for `len` bytes
    pub fn remote(id: CanId, kind: IdKind, len: usize) -> Result<Self> {
        if len > MAX_PAYLOAD {
            return Err(CanError::PayloadTooLong { len });
        }
        let mut frame = Self::new(id, kind, &[])?;
        frame.flags |= FrameFlags::REMOTE;
        // Remote frames carry a DLC but no data; keep the requested length as zeroes
        frame.payload = Payload::from_slice(&[0u8; MAX_PAYLOAD][..len])
            .map_err(|_| CanError::PayloadTooLong { len })?;
        Ok(frame)
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id(&self) -> CanId {
        self.id
    }

    pub fn kind(&self) -> IdKind {
        self.kind
    }

    pub fn is_extended(&self) -> bool {
        self.kind == IdKind::Extended
    }

    pub fn is_remote(&self) -> bool {
        self.flags.contains(FrameFlags::REMOTE)
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Leading payload byte used to multiplex sub-messages onto one identifier
    pub fn discriminator(&self) -> Option<u8> {
        if self.is_remote() {
            return None;
        }
        self.payload.first().copied()
    }

    /// Replaces the payload in place, keeping identifier and flags
    pub(crate) fn set_payload(&mut self, data: &[u8]) -> Result<()> {
        self.payload =
            Payload::from_slice(data).map_err(|_| CanError::PayloadTooLong { len: data.len() })?;
        Ok(())
    }
}
