//! minimega CLI backend.
//!
//! Implements [`Dispatcher`] and [`Inventory`] by shelling out to
//! `minimega -e` with JSON output enabled. Commands addressed to the
//! headnode run locally; everything else is relayed with `mesh send`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::cluster::{Destination, Dispatcher, FieldValues, Inventory};
use crate::error::{AppError, AppResult};
use crate::shell;

/// One per-host response as printed by `minimega -e .json true ...`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    /// Host that produced the response.
    #[serde(default)]
    pub host: String,
    /// Free-form response text.
    #[serde(default)]
    pub response: Option<String>,
    /// Column names for tabular output.
    #[serde(default)]
    pub header: Option<Vec<String>>,
    /// Tabular rows, each aligned with `header`.
    #[serde(default)]
    pub tabular: Option<Vec<Vec<String>>>,
    /// Error text; empty on success.
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    /// Returns the error text if this response carries one.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    /// Zips the header with every tabular row.
    pub fn rows(&self) -> Vec<FieldValues> {
        let header = self.header.as_deref().unwrap_or_default();

        self.tabular
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|row| {
                header
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<FieldValues>()
            })
            .collect()
    }
}

/// Parses the JSON printed by minimega into responses.
pub fn parse_responses(output: &str) -> Result<Vec<Response>, serde_json::Error> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(output)
}

/// Returns the first error carried by any response.
pub fn first_error(responses: &[Response]) -> Option<String> {
    responses.iter().find_map(|r| {
        r.error().map(|e| {
            if r.host.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", r.host, e)
            }
        })
    })
}

/// Compares host names on their short form so `kvm1` matches
/// `kvm1.example.com`.
fn same_host(a: &str, b: &str) -> bool {
    let short = |s: &str| s.split('.').next().unwrap_or_default().to_ascii_lowercase();
    !a.is_empty() && short(a) == short(b)
}

/// minimega command-line client.
#[derive(Debug, Clone)]
pub struct Minimega {
    binary: String,
    headnode: String,
}

impl Minimega {
    /// Creates a client that runs `binary` and treats `headnode` as local.
    pub fn new(binary: impl Into<String>, headnode: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            headnode: headnode.into(),
        }
    }

    /// Returns true if `host` names the node this app runs on.
    pub fn is_headnode(&self, host: &str) -> bool {
        same_host(host, &self.headnode)
    }

    /// Wraps `command` so it executes on `dest`.
    pub fn mesh_command(&self, dest: &Destination, command: &str) -> String {
        match dest {
            Destination::Host(host) if self.is_headnode(host) => command.to_string(),
            _ => format!("mesh send {} {}", dest, command),
        }
    }

    /// Builds the `vm info` query for a namespace.
    pub fn vm_info_command(namespace: &str, name: Option<&str>) -> String {
        match name {
            Some(vm) => format!("namespace {} .json true .filter name={} vm info", namespace, vm),
            None => format!("namespace {} .json true vm info", namespace),
        }
    }

    /// Runs a raw minimega command and returns its parsed responses.
    async fn run(&self, command: &str) -> AppResult<Vec<Response>> {
        let cmd = format!("{} -e {}", self.binary, shell::shellquote(command));
        let output = shell::sh_checked(&cmd)
            .await
            .map_err(|e| AppError::dispatch(command, e.to_string()))?;

        let responses = parse_responses(&output).map_err(|e| {
            AppError::dispatch(command, format!("unparseable minimega response: {}", e))
        })?;

        if let Some(err) = first_error(&responses) {
            return Err(AppError::dispatch(command, err));
        }

        Ok(responses)
    }
}

#[async_trait]
impl Dispatcher for Minimega {
    async fn send(&self, dest: &Destination, command: &str) -> AppResult<()> {
        let command = format!(".json true {}", self.mesh_command(dest, command));
        self.run(&command).await?;
        debug!(dest = %dest, command = %command, "Dispatched command");
        Ok(())
    }
}

#[async_trait]
impl Inventory for Minimega {
    async fn vm_info(&self, namespace: &str, name: Option<&str>) -> AppResult<Vec<FieldValues>> {
        let responses = self.run(&Self::vm_info_command(namespace, name)).await?;
        Ok(responses.iter().flat_map(Response::rows).collect())
    }
}
