pub mod api;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod health;
pub mod metrics;
pub mod monitor;
pub mod rounds;
pub mod shares;

pub use api::ApiServer;
pub use config::CoordinatorConfig;
pub use coordinator::RoundCoordinator;
pub use error::{CoordinatorError, Result};
