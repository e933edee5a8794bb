//! Shared types, error kinds, identifiers, and configuration loading for QNTX.
//!
//! # Modules
//!
//! - `config`: layered configuration loading (environment file, TOML settings, env overrides)
//! - `error`: the `Error` kind hierarchy and `Result` alias
//! - `id`: content-derived attestation identifiers (ASID)
//! - `types`: the attestation substrate's data model

pub mod config;
pub mod error;
pub mod id;
pub mod types;

pub use error::{Error, Result};
pub use id::compute_asid;
pub use types::*;
