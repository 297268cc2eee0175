//! Progress replication: snapshot queue, drain task, and the per-book guards
//! (cooldown, in-flight, session lifecycle) it consults.

mod cooldown;
mod engine;
mod in_flight;
mod sessions;
mod target;

pub use cooldown::CooldownTracker;
pub use engine::{AuthAlert, EngineConfig, SyncEngine, SyncEngineBuilder};
pub use in_flight::{InFlightSet, Reservation};
pub use sessions::SessionCoordinator;
pub use target::select_target;
