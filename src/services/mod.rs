pub mod auth_service;
pub mod client;
pub mod connection;
pub mod reconnection;
