//! Media client implementations.

pub mod loopback;

pub use loopback::LoopbackClient;
