//! In-memory cluster for driving apps without minimega.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use phenix_app_common::{
    AppError, AppResult, Destination, Dispatcher, FieldValues, FieldValuesExt, Inventory, Resolver,
};

/// A command the app tried to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub dest: Destination,
    pub command: String,
    /// False when the mock was told to fail this command.
    pub ok: bool,
}

/// Mock cluster implementing every app seam.
///
/// Commands are recorded in send order. Any command containing one of the
/// configured failure patterns is recorded and then fails.
#[derive(Debug, Default)]
pub struct MockCluster {
    rows: Mutex<Vec<FieldValues>>,
    hosts: Mutex<HashMap<String, Vec<IpAddr>>>,
    failures: Mutex<Vec<String>>,
    sent: Mutex<Vec<SentCommand>>,
    inventory_down: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rows returned by `vm info`.
    pub fn with_rows(self, rows: Vec<FieldValues>) -> Self {
        *lock(&self.rows) = rows;
        self
    }

    /// Makes `name` resolve to `ip`.
    pub fn with_host(self, name: &str, ip: &str) -> Self {
        let ip = ip.parse().unwrap_or_else(|_| panic!("invalid test address {}", ip));
        lock(&self.hosts).entry(name.to_string()).or_default().push(ip);
        self
    }

    /// Fails every command containing `pattern`.
    pub fn fail_on(self, pattern: &str) -> Self {
        lock(&self.failures).push(pattern.to_string());
        self
    }

    /// Makes every `vm info` query fail.
    pub fn inventory_down(self) -> Self {
        self.inventory_down.store(true, Ordering::SeqCst);
        self
    }

    /// Every attempted command, including failed ones.
    pub fn attempted(&self) -> Vec<SentCommand> {
        lock(&self.sent).clone()
    }

    /// Commands that were accepted.
    pub fn sent(&self) -> Vec<(Destination, String)> {
        lock(&self.sent)
            .iter()
            .filter(|c| c.ok)
            .map(|c| (c.dest.clone(), c.command.clone()))
            .collect()
    }

    /// Accepted commands addressed to `dest`.
    pub fn commands_for(&self, dest: &Destination) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(d, _)| d == dest)
            .map(|(_, c)| c)
            .collect()
    }

    /// Forgets recorded commands, keeping rows, hosts and failures.
    pub fn clear(&self) {
        lock(&self.sent).clear();
    }
}

#[async_trait]
impl Dispatcher for MockCluster {
    async fn send(&self, dest: &Destination, command: &str) -> AppResult<()> {
        let ok = !lock(&self.failures).iter().any(|p| command.contains(p.as_str()));

        lock(&self.sent).push(SentCommand {
            dest: dest.clone(),
            command: command.to_string(),
            ok,
        });

        if ok {
            Ok(())
        } else {
            Err(AppError::dispatch(command, "mock failure"))
        }
    }
}

#[async_trait]
impl Inventory for MockCluster {
    async fn vm_info(&self, namespace: &str, name: Option<&str>) -> AppResult<Vec<FieldValues>> {
        if self.inventory_down.load(Ordering::SeqCst) {
            return Err(AppError::dispatch(
                format!("namespace {} vm info", namespace),
                "mock inventory unavailable",
            ));
        }

        Ok(lock(&self.rows)
            .iter()
            .filter(|row| name.map_or(true, |n| row.get_field("name") == Some(n)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Resolver for MockCluster {
    async fn lookup(&self, host: &str) -> AppResult<Vec<IpAddr>> {
        Ok(lock(&self.hosts).get(host).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::vm_row;

    #[tokio::test]
    async fn test_records_and_fails() {
        let mock = MockCluster::new().fail_on("del-port");

        mock.send(&Destination::host("kvm1"), "tap delete x").await.unwrap();
        assert!(mock
            .send(&Destination::All, "shell ovs-vsctl del-port phenix x")
            .await
            .is_err());

        assert_eq!(mock.attempted().len(), 2);
        assert_eq!(mock.sent(), vec![(Destination::host("kvm1"), "tap delete x".to_string())]);
        assert!(mock.commands_for(&Destination::All).is_empty());

        mock.clear();
        assert!(mock.attempted().is_empty());
    }

    #[tokio::test]
    async fn test_inventory_filter() {
        let mock = MockCluster::new().with_rows(vec![
            vm_row("a", &[("EXP", 101)], &["t0"]),
            vm_row("b", &[("EXP", 101)], &["t1"]),
        ]);

        assert_eq!(mock.vm_info("foobar", None).await.unwrap().len(), 2);
        assert_eq!(mock.vm_info("foobar", Some("b")).await.unwrap().len(), 1);
        assert!(mock.vm_info("foobar", Some("c")).await.unwrap().is_empty());

        let down = MockCluster::new().inventory_down();
        assert!(down.vm_info("foobar", None).await.is_err());
    }

    #[tokio::test]
    async fn test_resolver() {
        let mock = MockCluster::new().with_host("kvm1", "10.0.0.1");
        assert_eq!(mock.lookup("kvm1").await.unwrap(), vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
        assert!(mock.lookup("kvm9").await.unwrap().is_empty());
    }
}
