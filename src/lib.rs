//! CAN message registration and dispatch for vehicle controllers.
//!
//! Device drivers register the identifiers they want to receive and the
//! periodic messages they transmit with a [`service::CanService`]. The service
//! dispatches every received frame to its registration, supervises receive
//! liveness once per control tick and throttles periodic transmits.

// OSI Layer modules
pub mod data_link; // Frame model and payload codec
pub mod network; // J1939 identifiers
pub mod physical; // Bus port boundary

// Registration, dispatch and device records
pub mod device;
pub mod service;

// Common types and traits
pub mod error;
pub mod types;

// Re-exports for convenience
pub use data_link::codec::{PayloadReader, PayloadWriter, WireDecode, WireEncode};
pub use data_link::{Frame, IdKind};
pub use error::{CanError, Result};
pub use service::{CanService, ServiceConfig};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
