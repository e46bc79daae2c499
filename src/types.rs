use serde::{Deserialize, Serialize};
use std::fmt;

/// CAN ID type
pub type CanId = u32;

/// Receive timestamp in free-running controller ticks
pub type Timestamp = u64;

/// Identifier of the controller module that owns a bus line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u8);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Physical CAN line of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BusLine {
    Can1,
    Can2,
    Can3,
    Can4,
}

impl fmt::Display for BusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusLine::Can1 => write!(f, "CAN1"),
            BusLine::Can2 => write!(f, "CAN2"),
            BusLine::Can3 => write!(f, "CAN3"),
            BusLine::Can4 => write!(f, "CAN4"),
        }
    }
}

/// One physical unit of a device type (charger #1, charger #2, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceInstance(pub u8);

impl DeviceInstance {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeviceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Configuration trait that must be implemented by all service configurations
pub trait Config: Send + Sync {
    fn validate(&self) -> crate::error::Result<()>;
}
