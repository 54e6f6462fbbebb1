//! Capability traits the pipeline consumes.
//!
//! Applications plug concrete backends in here: a text generator, a cheap
//! fetcher, an optional renderer and a user-agent source.

pub mod fetcher;
pub mod generator;
