// lamport_runner/src/lib.rs
//! Nodes that advance Lamport clocks at independent tick rates and exchange
//! timestamps over TCP, plus the launcher and log analysis around them.

pub mod analysis;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod error;
pub mod event;
pub mod eventlog;
pub mod network;
pub mod node;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod telemetry;
pub mod utils;
pub mod wire;

pub use clock::{ClockTransition, LamportClock};
pub use config::{ActionWeights, ClockRatePolicy, NodeConfig, PeerAddr};
pub use error::{AnalysisError, NodeError, SendError, WireError};
pub use event::{EventKind, EventRecord};
pub use node::{Node, NodeReport};
pub use queue::IncomingQueue;
pub use scheduler::{decide, Action, Scheduler, SchedulerState};
