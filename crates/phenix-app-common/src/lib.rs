//! Common infrastructure for phenix user apps.
//!
//! This crate provides shared functionality for apps that drive a
//! minimega cluster on behalf of phenix:
//!
//! - [`cluster`]: [`Dispatcher`], [`Inventory`] and [`Resolver`] seams
//! - [`minimega`]: the minimega CLI backend for those seams
//! - [`shell`]: Shell command execution with proper quoting
//! - [`error`]: Error types for app operations
//!
//! # Example
//!
//! ```ignore
//! use phenix_app_common::{AppResult, Destination, Dispatcher, Minimega};
//!
//! async fn delete_tap(mm: &Minimega, name: &str) -> AppResult<()> {
//!     mm.send(&Destination::All, &format!("tap delete {}", name)).await
//! }
//! ```

pub mod cluster;
pub mod error;
pub mod minimega;
pub mod shell;

// Re-export commonly used items at crate root
pub use cluster::{
    Destination, Dispatcher, DnsResolver, FieldValue, FieldValues, FieldValuesExt, Inventory,
    Resolver,
};
pub use error::{AppError, AppResult};
pub use minimega::Minimega;
