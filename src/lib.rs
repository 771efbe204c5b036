#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod telemetry;

pub use domain::endpoint::Endpoint;
pub use domain::notification::{DeliveryPriority, PushNotification, PushType};
pub use domain::response::{PushNotificationResponse, RejectionReason};
pub use services::client::{ApnsClient, ApnsClientBuilder};
pub use services::connection::PendingResponse;
pub use services::reconnection::{ConnectionState, ReconnectionPolicy};
