pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod handoff;
pub mod io;
pub mod paths;
pub mod phase;
pub mod profile;
pub mod progress;
pub mod records;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod work_item;

pub use engine::{Engine, RollbackOptions};
pub use error::{ErrorKind, PhasegateError, Result};
