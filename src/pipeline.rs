pub mod engine;
pub mod ops;
