//! PPB Command Engine
//!
//! This crate drives PPB units through a UDP bridge: it serializes commands
//! per address, tracks each address's state, correlates acknowledgements and
//! data packets with the command in flight, and reports everything through a
//! single event stream.
//!
//! # Architecture
//!
//! - [`Engine`] is the synchronous state machine. It performs no I/O and is
//!   driven entirely by method calls that carry the current time.
//! - [`actor::run_engine_actor`] owns the engine inside one task and feeds it
//!   caller commands, datagrams, queue ticks and deadline expiries.
//! - [`transport::run_udp_transport`] moves datagrams between the socket and
//!   the actor.
//! - [`PpbController`] is the facade applications use.
//!
//! Each address moves `Idle -> SendingCommand -> (WaitingData) -> Ready`.
//! Data packets carry no address, so a system-wide [`DialogGate`] ensures only
//! one address has a multi-packet reply outstanding at any time.
//!
//! # Example
//!
//! ```rust,no_run
//! use ppb_engine::{EngineConfig, EngineEvent, PpbController, RequestParams};
//! use ppb_protocol::{Address, TechCommand};
//!
//! # async fn example() -> Result<(), ppb_engine::ControllerError> {
//! let mut controller = PpbController::new();
//! let mut events = controller.start(EngineConfig::default()).await?;
//!
//! let unit = Address(0x0001);
//! controller.connect(unit, "192.168.1.50".parse().unwrap(), 5000).await?;
//! controller.execute(TechCommand::Vers, unit, RequestParams::default()).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let EngineEvent::DataReady { data, .. } = event {
//!         println!("{:?}", data);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod context;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod state;
pub mod transport;

// Re-export actor types
pub use actor::{run_engine_actor, AddressStatus, EngineCommand};

// Re-export facade types
pub use controller::{EngineIo, PpbController};

// Re-export engine types
pub use context::PpbContext;
pub use engine::{DispatchOutcome, Engine, EngineConfig, Outgoing, RequestParams};
pub use error::{ControllerError, DispatchError, EngineError, TimeoutError};
pub use events::{EngineEvent, Target};
pub use state::{DialogGate, PpbState};
