pub mod common;
pub mod gpu;
pub mod logger;
