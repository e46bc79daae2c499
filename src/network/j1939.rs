use crate::data_link::{Frame, IdKind, EXTENDED_ID_MAX};
use crate::error::{CanError, Result};
use crate::types::CanId;

/// Global (broadcast) destination address
pub const GLOBAL_ADDRESS: u8 = 0xFF;

const PDU2_THRESHOLD: u8 = 240;

/// Decomposed 29-bit J1939 identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct J1939Id {
    pub priority: u8,
    pub pgn: u32,
    pub source: u8,
}

impl J1939Id {
    pub fn new(priority: u8, pgn: u32, source: u8) -> Result<Self> {
        if priority > 7 {
            return Err(CanError::InvalidParameter("J1939 priority above 7"));
        }
        if pgn > 0x3FFFF {
            return Err(CanError::InvalidParameter("PGN wider than 18 bits"));
        }
        Ok(Self {
            priority,
            pgn,
            source,
        })
    }

    /// Builds a PDU1 (destination-specific) identifier
    pub fn to_destination(priority: u8, pgn: u32, destination: u8, source: u8) -> Result<Self> {
        let id = Self::new(priority, pgn & !0xFF, source)?;
        if id.pdu_format() >= PDU2_THRESHOLD {
            return Err(CanError::InvalidParameter("PDU2 PGNs are broadcast only"));
        }
        Ok(Self {
            pgn: id.pgn | destination as u32,
            ..id
        })
    }

    pub fn from_raw(id: CanId) -> Self {
        Self {
            priority: ((id >> 26) & 0x7) as u8,
            pgn: (id >> 8) & 0x3FFFF,
            source: (id & 0xFF) as u8,
        }
    }

    pub fn to_raw(&self) -> CanId {
        (((self.priority as u32) << 26) | (self.pgn << 8) | self.source as u32) & EXTENDED_ID_MAX
    }

    pub fn pdu_format(&self) -> u8 {
        ((self.pgn >> 8) & 0xFF) as u8
    }

    /// Destination address for PDU1 messages, `None` for broadcast PDU2
    pub fn destination(&self) -> Option<u8> {
        if self.pdu_format() < PDU2_THRESHOLD {
            Some((self.pgn & 0xFF) as u8)
        } else {
            None
        }
    }

    /// Parameter group with the destination byte masked off for PDU1
    pub fn parameter_group(&self) -> u32 {
        if self.pdu_format() < PDU2_THRESHOLD {
            self.pgn & !0xFF
        } else {
            self.pgn
        }
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        if frame.kind() != IdKind::Extended {
            return Err(CanError::InvalidIdentifier {
                id: frame.id(),
                kind: frame.kind(),
            });
        }
        Ok(Self::from_raw(frame.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_id_round_trip() {
        let id = J1939Id::new(6, 0xFF50, 0x80).unwrap();
        assert_eq!(id.to_raw(), 0x18FF_5080);
        assert_eq!(J1939Id::from_raw(0x18FF_5080), id);
        assert_eq!(id.destination(), None);
        assert_eq!(id.parameter_group(), 0xFF50);
    }

    #[test]
    fn test_destination_specific_id() {
        let id = J1939Id::to_destination(6, 0xEF00, 0x27, 0xF9).unwrap();
        assert_eq!(id.to_raw(), 0x18EF_27F9);
        assert_eq!(id.destination(), Some(0x27));
        assert_eq!(id.parameter_group(), 0xEF00);
        assert!(J1939Id::to_destination(6, 0xFF50, 0x27, 0xF9).is_err());
    }

    #[test]
    fn test_rejects_standard_frame() {
        let frame = Frame::standard(0x100, &[]).unwrap();
        assert!(J1939Id::from_frame(&frame).is_err());
        assert!(J1939Id::new(8, 0, 0).is_err());
    }
}
