//! Cluster control-plane abstractions.
//!
//! Apps never talk to cluster hosts directly. Mutations go through a
//! [`Dispatcher`], live VM state comes from an [`Inventory`], and cluster
//! host addresses come from a [`Resolver`]. The production implementations
//! live in [`crate::minimega`] and [`DnsResolver`]; tests substitute
//! recording doubles.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::AppResult;

/// Where a command is executed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Destination {
    /// A single named cluster host (possibly the headnode itself).
    Host(String),
    /// Every cluster host reachable over the mesh.
    All,
}

impl Destination {
    /// Creates a destination for a named host.
    pub fn host(name: impl Into<String>) -> Self {
        Destination::Host(name.into())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Host(name) => f.write_str(name),
            Destination::All => f.write_str("all"),
        }
    }
}

/// Key-value tuple representing a column and its value.
pub type FieldValue = (String, String);

/// One tabular row, in column order.
pub type FieldValues = Vec<FieldValue>;

/// Helper trait for working with tabular rows.
pub trait FieldValuesExt {
    /// Gets the value for a field, if present.
    fn get_field(&self, field: &str) -> Option<&str>;

    /// Gets the value for a field, returning the default if not present.
    fn get_field_or<'a>(&'a self, field: &str, default: &'a str) -> &'a str;
}

impl FieldValuesExt for FieldValues {
    fn get_field(&self, field: &str) -> Option<&str> {
        self.iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    fn get_field_or<'a>(&'a self, field: &str, default: &'a str) -> &'a str {
        self.get_field(field).unwrap_or(default)
    }
}

/// Builds a FieldValues row from key-value pairs.
#[macro_export]
macro_rules! field_values {
    ($($field:expr => $value:expr),* $(,)?) => {
        vec![
            $(($field.to_string(), $value.to_string()),)*
        ]
    };
}

/// Sends commands to the cluster.
///
/// Each call completes (successfully or not) before it returns; callers
/// rely on this to order dependent mutations.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Runs `command` on `dest`, returning a single error for the call.
    async fn send(&self, dest: &Destination, command: &str) -> AppResult<()>;
}

/// Reports live VM state for a namespace.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Returns `vm info` rows for `namespace`, optionally restricted to
    /// the VM named `name`. Rows are in cluster iteration order.
    async fn vm_info(&self, namespace: &str, name: Option<&str>) -> AppResult<Vec<FieldValues>>;
}

/// Resolves cluster host names to addresses.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Returns every address `host` resolves to. An unresolvable name
    /// yields an empty list rather than an error.
    async fn lookup(&self, host: &str) -> AppResult<Vec<IpAddr>>;
}

/// System resolver backed by `getaddrinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn lookup(&self, host: &str) -> AppResult<Vec<IpAddr>> {
        match tokio::net::lookup_host((host, 0)).await {
            Ok(addrs) => Ok(addrs.map(|a| a.ip()).collect()),
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "Host lookup failed");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_display() {
        assert_eq!(Destination::host("kvm1").to_string(), "kvm1");
        assert_eq!(Destination::All.to_string(), "all");
    }

    #[test]
    fn test_field_values_ext() {
        let row: FieldValues = field_values! {
            "name" => "vm1",
            "tap" => "[mega_tap0]",
        };

        assert_eq!(row.get_field("name"), Some("vm1"));
        assert_eq!(row.get_field("vlan"), None);
        assert_eq!(row.get_field_or("vlan", "[]"), "[]");
        assert_eq!(row.get_field_or("tap", ""), "[mega_tap0]");
    }

    #[tokio::test]
    async fn test_dns_resolver_localhost() {
        let addrs = DnsResolver.lookup("localhost").await.unwrap();
        assert!(addrs.iter().all(|a| a.is_loopback()));
    }
}
