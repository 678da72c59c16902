pub mod deployment;
pub mod metrics;
pub mod strategy;

pub use deployment::*;
pub use metrics::*;
pub use strategy::*;
