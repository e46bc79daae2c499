pub mod j1939;

pub use j1939::{J1939Id, GLOBAL_ADDRESS};
