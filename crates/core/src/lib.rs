// Cronloom Core - scheduling engine, domain model, and ports
// NO infrastructure dependencies; store adapters live in sibling crates

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{Scheduler, SchedulerConfig};
pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
