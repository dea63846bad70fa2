//! Verification helpers for testing cluster side effects
//!
//! Replays a command log against a model of the cluster and reports what
//! is left behind: taps, bridge ports, mirrors and flow rules.

use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use phenix_app_common::Destination;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("{} object(s) left on the cluster: {}", .0.len(), ObjectList(.0))]
    Residue(Vec<ClusterObject>),

    #[error("Expected {expected} {kind} object(s), found {actual}")]
    CountMismatch {
        kind: ObjectKind,
        expected: usize,
        actual: usize,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Tap,
    Port,
    Mirror,
    Flow,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Tap => "tap",
            ObjectKind::Port => "port",
            ObjectKind::Mirror => "mirror",
            ObjectKind::Flow => "flow",
        };
        f.write_str(s)
    }
}

/// Something a command creates on a cluster host. Taps carry no bridge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterObject {
    pub host: String,
    pub kind: ObjectKind,
    pub bridge: String,
    pub name: String,
}

impl fmt::Display for ClusterObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bridge.is_empty() {
            write!(f, "{} {}@{}", self.kind, self.name, self.host)
        } else {
            write!(f, "{} {}/{}@{}", self.kind, self.bridge, self.name, self.host)
        }
    }
}

struct ObjectList<'a>(&'a [ClusterObject]);

impl fmt::Display for ObjectList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&items.join(", "))
    }
}

static TAP_CREATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^tap create \S+ bridge \S+ ip \S+ (\S+)$").expect("Invalid regex pattern"));
static TAP_DELETE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^tap delete (\S+)$").expect("Invalid regex pattern"));
static ADD_PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^shell ovs-vsctl add-port (\S+) (\S+)").expect("Invalid regex pattern"));
static DEL_PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^shell ovs-vsctl del-port (\S+) (\S+)$").expect("Invalid regex pattern"));
static CREATE_MIRROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"create mirror name=(\S+) .* -- set bridge (\S+) mirrors=@m$").expect("Invalid regex pattern")
});
static REMOVE_MIRROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"get mirror (\S+) -- remove bridge (\S+) mirrors @m$").expect("Invalid regex pattern")
});
static ADD_FLOW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^shell ovs-ofctl add-flow (\S+) "in_port=(\S+) "#).expect("Invalid regex pattern")
});
static DEL_FLOWS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^shell ovs-ofctl del-flows (\S+) in_port=(\S+)$").expect("Invalid regex pattern")
});

enum Effect {
    Create(ObjectKind, String, String),
    Remove(ObjectKind, String, String),
    None,
}

/// Captures two names from `command`, returned as (bridge, name).
fn bridge_and_name(re: &Regex, command: &str, bridge_first: bool) -> Option<(String, String)> {
    re.captures(command).map(|c| {
        let (a, b) = (c[1].to_string(), c[2].to_string());
        if bridge_first {
            (a, b)
        } else {
            (b, a)
        }
    })
}

fn effect(command: &str) -> Effect {
    if let Some(c) = TAP_CREATE_RE.captures(command) {
        return Effect::Create(ObjectKind::Tap, String::new(), c[1].to_string());
    }
    if let Some(c) = TAP_DELETE_RE.captures(command) {
        return Effect::Remove(ObjectKind::Tap, String::new(), c[1].to_string());
    }
    if let Some((bridge, name)) = bridge_and_name(&ADD_PORT_RE, command, true) {
        return Effect::Create(ObjectKind::Port, bridge, name);
    }
    if let Some((bridge, name)) = bridge_and_name(&DEL_PORT_RE, command, true) {
        return Effect::Remove(ObjectKind::Port, bridge, name);
    }
    if let Some((bridge, name)) = bridge_and_name(&CREATE_MIRROR_RE, command, false) {
        return Effect::Create(ObjectKind::Mirror, bridge, name);
    }
    if let Some((bridge, name)) = bridge_and_name(&REMOVE_MIRROR_RE, command, false) {
        return Effect::Remove(ObjectKind::Mirror, bridge, name);
    }
    if let Some((bridge, name)) = bridge_and_name(&ADD_FLOW_RE, command, true) {
        return Effect::Create(ObjectKind::Flow, bridge, name);
    }
    if let Some((bridge, name)) = bridge_and_name(&DEL_FLOWS_RE, command, true) {
        return Effect::Remove(ObjectKind::Flow, bridge, name);
    }

    Effect::None
}

/// Model of the objects a command log leaves on the cluster.
#[derive(Debug, Default)]
pub struct ClusterState {
    objects: BTreeSet<ClusterObject>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies commands in order. Removals sent to every host remove the
    /// object wherever it exists.
    pub fn apply<'a, I>(&mut self, commands: I)
    where
        I: IntoIterator<Item = &'a (Destination, String)>,
    {
        for (dest, command) in commands {
            match effect(command) {
                Effect::Create(kind, bridge, name) => {
                    self.objects.insert(ClusterObject {
                        host: dest.to_string(),
                        kind,
                        bridge,
                        name,
                    });
                }
                Effect::Remove(kind, bridge, name) => {
                    self.objects.retain(|o| {
                        let on_host = match dest {
                            Destination::All => true,
                            Destination::Host(h) => &o.host == h,
                        };
                        !(on_host && o.kind == kind && o.bridge == bridge && o.name == name)
                    });
                }
                Effect::None => {}
            }
        }
    }

    pub fn objects(&self) -> impl Iterator<Item = &ClusterObject> {
        self.objects.iter()
    }

    pub fn count(&self, kind: ObjectKind) -> usize {
        self.objects.iter().filter(|o| o.kind == kind).count()
    }

    /// Verify that a specific number of objects of `kind` exist
    pub fn assert_count(&self, kind: ObjectKind, expected: usize) -> VerifyResult<()> {
        let actual = self.count(kind);
        if actual != expected {
            return Err(VerificationError::CountMismatch {
                kind,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify that nothing is left on the cluster
    pub fn assert_empty(&self) -> VerifyResult<()> {
        if self.objects.is_empty() {
            Ok(())
        } else {
            Err(VerificationError::Residue(self.objects.iter().cloned().collect()))
        }
    }
}

/// Verifies that `commands` leave nothing behind.
pub fn assert_no_residue(commands: &[(Destination, String)]) -> VerifyResult<()> {
    let mut state = ClusterState::new();
    state.apply(commands);
    state.assert_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cmd(dest: Destination, c: &str) -> (Destination, String) {
        (dest, c.to_string())
    }

    #[test]
    fn test_create_and_remove() {
        let kvm1 = Destination::host("kvm1");
        let log = vec![
            cmd(kvm1.clone(), "tap create foobar//mirror bridge phenix ip 172.30.0.1/16 foobar-mirror"),
            cmd(kvm1.clone(), "shell ovs-vsctl add-port phenix foobar-nids -- set interface foobar-nids type=gre options:remote_ip=172.30.255.254"),
            cmd(kvm1.clone(), "shell ovs-vsctl -- --id=@i0 get port mega_tap0 -- --id=@o get port foobar-nids -- --id=@m create mirror name=foobar-nids select-dst-port=@i0 select-vlan=101 output-port=@o -- set bridge phenix mirrors=@m"),
            cmd(kvm1, r#"shell ovs-ofctl add-flow expbr "in_port=nids actions=output:mega_tap1""#),
        ];

        let mut state = ClusterState::new();
        state.apply(&log);
        assert_eq!(state.count(ObjectKind::Tap), 1);
        assert_eq!(state.count(ObjectKind::Port), 1);
        assert_eq!(state.count(ObjectKind::Mirror), 1);
        assert_eq!(state.count(ObjectKind::Flow), 1);

        state.apply(&[
            cmd(Destination::All, "shell ovs-vsctl -- --id=@m get mirror foobar-nids -- remove bridge phenix mirrors @m"),
            cmd(Destination::All, "shell ovs-vsctl del-port phenix foobar-nids"),
            cmd(Destination::All, "tap delete foobar-mirror"),
        ]);

        state.assert_count(ObjectKind::Flow, 1).unwrap();

        state.apply(&[cmd(Destination::host("kvm2"), "shell ovs-ofctl del-flows expbr in_port=nids")]);
        assert!(state.assert_empty().is_err());

        state.apply(&[cmd(Destination::host("kvm1"), "shell ovs-ofctl del-flows expbr in_port=nids")]);
        state.assert_empty().unwrap();
    }

    #[test]
    fn test_residue_message() {
        let log = vec![cmd(Destination::host("kvm1"), "shell ovs-vsctl add-port phenix t -- set interface t type=gre")];
        let err = assert_no_residue(&log).unwrap_err();
        assert_eq!(err.to_string(), "1 object(s) left on the cluster: port phenix/t@kvm1");
    }

    #[test]
    fn test_unrelated_commands_ignored() {
        let log = vec![cmd(Destination::host("kvm1"), "shell ovs-vsctl set bridge expbr rstp-enable=true")];
        assert_no_residue(&log).unwrap();
    }
}
