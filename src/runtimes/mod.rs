//! Container runtime implementations.
//!
//! Each implementation drives a locally installed runtime through its
//! command line client.

pub mod docker;

pub use self::docker::DockerCli;
