pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::MessagingConfig;
pub use error::{MessagingError, MessagingResult};
