pub mod config;
pub mod message;
pub mod resume;
pub mod streams;
