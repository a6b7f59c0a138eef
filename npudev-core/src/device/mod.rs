//! Device model
//!
//! Device files, their naming grammar, the per-device topology, management
//! metadata and the interface over a host's device namespace.

mod file;
mod info;
mod interface;
mod topology;

pub use file::*;
pub use info::{DeviceInfo, NumaNode};
pub use interface::{create_interface, NpuInterface, NpuSystem};
pub use topology::{build, Device};
