pub mod message;
pub mod payload;
pub mod session;
pub mod warning;
