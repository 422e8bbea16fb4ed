pub mod config;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod model;
pub mod types;

pub use config::{ClearingConfig, HubConfig, IntegrityConfig, PaymentConfig, RoutingConfig};
pub use constants::*;
pub use envelope::*;
pub use error::HubError;
pub use model::*;
pub use types::*;
