pub mod metrics;
pub mod proxy;
pub mod transport;
