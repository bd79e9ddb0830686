//! Infrastructure behind the engine's collaborator traits.

pub mod database;
pub mod metrics;
pub mod notifier;

pub use database::PgStore;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::HttpNotifier;
