// Barline - measure-synchronized playrate changes for live sessions
// Module declarations

pub mod config;
pub mod controller;
pub mod coordinator;
pub mod ipc;
pub mod rate;
pub mod transport;

pub use config::Config;
pub use controller::{ActionKind, ActionOptions, ActionSource, RateController};
pub use coordinator::{Coordinator, HostTransport, Phase};
pub use ipc::{Command, CommandMailbox, Status, StatusFile};
pub use rate::RateBounds;
pub use transport::OscTransport;
