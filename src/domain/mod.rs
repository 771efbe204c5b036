pub mod credentials;
pub mod endpoint;
pub mod notification;
pub mod payload;
pub mod response;
pub mod token;
