//! Azure Resource Manager compute module functions.
//!
//! This crate exposes availability set and virtual machine operations in
//! the calling convention of a configuration management execution module:
//! each function takes resource names plus a keyword bundle that carries
//! both operation options and provider credentials, and answers a JSON
//! value with failures folded in rather than propagated.
//!
//! The layers:
//! - [`azurerm`] holds the ARM plumbing: credential resolution, token
//!   acquisition, the REST client, and the request-body models.
//! - [`modules`] holds the callable functions and the dispatcher the
//!   `azurerm-call` binary drives.

pub mod azurerm;
pub mod error;
pub mod modules;

pub use error::{CloudError, Result};
