// src/portal/mod.rs — FusionSolar portal client

pub mod clock;
pub mod crypto;
pub mod devices;
pub mod energy_flow;
pub mod session;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use energy_flow::{EnergyFlowReader, EnergyFlowSnapshot};
pub use session::{SessionInfo, SessionManager, StationIdentity};
