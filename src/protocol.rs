pub mod message;
pub mod runtime;
