pub mod booking;
pub mod config;
pub mod error;
pub mod guard;
pub mod machine;
pub mod notification;
pub mod offer;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;

pub use booking::{Booking, BookingStatus, Party};
pub use config::BookingConfig;
pub use error::BookingError;
pub use machine::Decision;
pub use service::{BookingService, BookingView};
