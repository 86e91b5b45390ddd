//! Register the clusters behind kubeconfig contexts with the Codefresh
//! control plane.
//!
//! For every selected context a service-account token secret is created in
//! the cluster, read back once the token controller has filled it in, and the
//! token and CA are posted to the control plane. Each context gets one row in
//! the final report, whether it succeeded or not.
pub mod config;
pub mod context;
pub mod control_plane;
pub mod error;
pub mod provider;
pub mod registrar;
pub mod reporter;

pub use error::{Error, Result};
