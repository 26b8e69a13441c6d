//! clientmgr operator: reconciles `Client` resources into running, bound
//! workload pods.
//!
//! A `Client` declares a container image, tag, and client identifier. The
//! controller provisions a pod for the declared image, registers the client
//! identifier with the sibling service running inside that pod, and retires
//! superseded pods once no clients remain bound to them.

pub mod binding;
pub mod controller;
pub mod crd;
pub mod error;
pub mod resources;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
