//! PPB Simulation Library
//!
//! This crate provides a simulation layer for exercising the PPB engine
//! without bridge hardware. It includes:
//!
//! - **VirtualPpb**: Simulates one unit, with injectable faults
//! - **VirtualBridge**: Routes requests to units by address bit and answers
//!   FU acknowledgements itself
//! - **run_virtual_bridge_task**: Serves a bridge over UDP
//!
//! # Example
//!
//! ```rust
//! use ppb_protocol::{Address, EncodeFrame, PpbResponse, TechCommand};
//! use ppb_sim::VirtualBridge;
//!
//! let mut bridge = VirtualBridge::with_units([Address(0x0001)]);
//! let request = TechCommand::Tc.build_request(Address(0x0001), 0, [0; 3]);
//!
//! let replies = bridge.handle_datagram(&request.encode());
//! assert!(PpbResponse::decode(&replies[0]).unwrap().is_ok());
//! ```

pub mod bridge;
pub mod bridge_task;
pub mod ppb;

pub use bridge::VirtualBridge;
pub use bridge_task::{
    run_virtual_bridge_task, spawn_loopback_bridge, VirtualBridgeCommand, VirtualBridgeHandle,
};
pub use ppb::{Faults, Reply, VirtualPpb, VirtualPpbConfig};
