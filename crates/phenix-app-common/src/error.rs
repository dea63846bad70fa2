//! Error types for phenix app operations.
//!
//! This module defines the error types used throughout the app crates.
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for app operations.
pub type AppResult<T> = Result<T, AppError>;

/// Errors that can occur while running an app phase.
#[derive(Debug, Error)]
pub enum AppError {
    /// Failed to read the experiment descriptor from standard input.
    #[error("Unable to read experiment from STDIN: {source}")]
    InputRead {
        #[source]
        source: io::Error,
    },

    /// The experiment descriptor is not valid JSON or has the wrong shape.
    #[error("Decoding experiment: {source}")]
    DescriptorDecode {
        #[source]
        source: serde_json::Error,
    },

    /// The experiment could not be serialized back to JSON.
    #[error("Encoding experiment: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },

    /// App or host metadata failed to decode.
    #[error("Decoding metadata for {subject}: {source}")]
    MetadataDecode {
        /// Either `app` or the hostname the metadata belongs to.
        subject: String,
        #[source]
        source: serde_json::Error,
    },

    /// The network part of a CIDR string is not an address literal.
    #[error("Invalid network address provided for mirror network: {address}")]
    InvalidNetwork {
        /// The offending address token.
        address: String,
    },

    /// The mask part of a CIDR string is not a usable prefix length.
    #[error("Invalid network mask provided for mirror network: {mask}")]
    InvalidMask {
        /// The offending mask token.
        mask: String,
    },

    /// A configured target does not exist in the topology.
    #[error("No host by the name of {hostname} found in topology")]
    UnknownHost {
        /// The missing hostname.
        hostname: String,
    },

    /// A configured target has no usable monitoring interface.
    #[error("No interface specified for host {hostname}")]
    MissingInterface {
        /// The target hostname.
        hostname: String,
    },

    /// ERSPAN is enabled with a version other than 1 or 2.
    #[error("Unknown ERSPAN version ({version}) configured for {hostname}")]
    InvalidErspanVersion {
        /// The configured version.
        version: i64,
        /// The target the tunnel was being built for.
        hostname: String,
    },

    /// A cluster host name did not resolve to any address.
    #[error("Cannot determine IP for cluster host {host}")]
    UnresolvableHost {
        /// The cluster host name.
        host: String,
    },

    /// A command sent to the cluster control plane failed.
    #[error("Executing mesh send ({command}): {message}")]
    Dispatch {
        /// The full command as sent.
        command: String,
        /// Error reported by the control plane.
        message: String,
    },

    /// Failed to spawn a shell command.
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Runtime configuration could not be loaded.
    #[error("Invalid configuration for {field}: {message}")]
    Config {
        /// The field or file that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

impl AppError {
    /// Creates a metadata decode error.
    pub fn metadata(subject: impl Into<String>, source: serde_json::Error) -> Self {
        Self::MetadataDecode {
            subject: subject.into(),
            source,
        }
    }

    /// Creates an unknown host error.
    pub fn unknown_host(hostname: impl Into<String>) -> Self {
        Self::UnknownHost {
            hostname: hostname.into(),
        }
    }

    /// Creates a missing interface error.
    pub fn missing_interface(hostname: impl Into<String>) -> Self {
        Self::MissingInterface {
            hostname: hostname.into(),
        }
    }

    /// Creates a dispatch error.
    pub fn dispatch(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dispatch {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }
}
