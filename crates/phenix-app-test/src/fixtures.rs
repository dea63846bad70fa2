//! Test fixtures for phenix experiments
//!
//! Experiments are produced as raw JSON so tests exercise the same decoding
//! path phenix input takes.

use serde_json::{json, Map, Value};

use phenix_app_common::{field_values, FieldValues};

/// Interface on a topology node.
#[derive(Debug, Clone, Default)]
pub struct IfaceFixture {
    pub name: String,
    pub vlan: String,
    pub bridge: String,
    pub address: String,
    pub mask: u32,
}

impl IfaceFixture {
    pub fn new(name: impl Into<String>, vlan: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vlan: vlan.into(),
            ..Default::default()
        }
    }

    pub fn bridge(mut self, bridge: impl Into<String>) -> Self {
        self.bridge = bridge.into();
        self
    }

    pub fn address(mut self, address: impl Into<String>, mask: u32) -> Self {
        self.address = address.into();
        self.mask = mask;
        self
    }

    fn to_json(&self) -> Value {
        let mut iface = Map::new();
        iface.insert("name".into(), json!(self.name));
        iface.insert("type".into(), json!("ethernet"));
        iface.insert("vlan".into(), json!(self.vlan));

        if !self.bridge.is_empty() {
            iface.insert("bridge".into(), json!(self.bridge));
        }

        if !self.address.is_empty() {
            iface.insert("address".into(), json!(self.address));
            iface.insert("mask".into(), json!(self.mask));
            iface.insert("proto".into(), json!("static"));
        }

        Value::Object(iface)
    }
}

/// Builder for a phenix experiment with a mirror app.
#[derive(Debug, Clone)]
pub struct ExperimentBuilder {
    name: String,
    nodes: Vec<Value>,
    schedules: Map<String, Value>,
    vlans: Map<String, Value>,
    app_metadata: Option<Value>,
    targets: Vec<Value>,
}

impl ExperimentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            schedules: Map::new(),
            vlans: Map::new(),
            app_metadata: None,
            targets: Vec::new(),
        }
    }

    /// Adds a topology node of the given type.
    pub fn node(mut self, kind: &str, hostname: &str, interfaces: &[IfaceFixture]) -> Self {
        self.nodes.push(json!({
            "type": kind,
            "general": {"hostname": hostname},
            "network": {
                "interfaces": interfaces.iter().map(IfaceFixture::to_json).collect::<Vec<_>>(),
            },
        }));
        self
    }

    pub fn vm(self, hostname: &str, interfaces: &[IfaceFixture]) -> Self {
        self.node("VirtualMachine", hostname, interfaces)
    }

    pub fn router(self, hostname: &str, interfaces: &[IfaceFixture]) -> Self {
        self.node("Router", hostname, interfaces)
    }

    /// Records the cluster host a VM was scheduled on.
    pub fn schedule(mut self, vm: &str, host: &str) -> Self {
        self.schedules.insert(vm.to_string(), json!(host));
        self
    }

    /// Records the ID allocated to a VLAN alias.
    pub fn vlan(mut self, alias: &str, id: u32) -> Self {
        self.vlans.insert(alias.to_string(), json!(id));
        self
    }

    /// Adds the mirror app with the given app-level metadata.
    pub fn mirror(mut self, metadata: Value) -> Self {
        self.app_metadata = Some(metadata);
        self
    }

    /// Shorthand for a direct GRE mirror app on the default mirror network.
    pub fn direct_gre(self) -> Self {
        self.mirror(json!({"directGRE": {"enabled": true}}))
    }

    /// Adds a mirror target with its monitoring interface and VLANs.
    pub fn target(mut self, hostname: &str, interface: &str, vlans: &[&str]) -> Self {
        self.targets.push(json!({
            "hostname": hostname,
            "metadata": {"interface": interface, "vlans": vlans},
        }));
        self
    }

    /// Adds a mirror target with raw host metadata.
    pub fn target_metadata(mut self, hostname: &str, metadata: Value) -> Self {
        self.targets.push(json!({"hostname": hostname, "metadata": metadata}));
        self
    }

    pub fn build(self) -> Value {
        let mut spec = json!({
            "experimentName": self.name,
            "topology": {"nodes": self.nodes},
        });

        if let Some(metadata) = self.app_metadata {
            spec["scenario"] = json!({
                "apps": [{
                    "name": "mirror",
                    "metadata": metadata,
                    "hosts": self.targets,
                }],
            });
        }

        json!({
            "spec": spec,
            "status": {
                "schedules": self.schedules,
                "vlans": self.vlans,
            },
        })
    }
}

/// Builds a `vm info` row in minimega's tabular format.
pub fn vm_row(name: &str, vlans: &[(&str, u32)], taps: &[&str]) -> FieldValues {
    let vlans: Vec<String> = vlans
        .iter()
        .map(|(alias, id)| format!("{} ({})", alias, id))
        .collect();

    field_values! {
        "name" => name,
        "vlan" => format!("[{}]", vlans.join(", ")),
        "tap" => format!("[{}]", taps.join(", ")),
    }
}

/// Two cluster hosts, a monitoring VM and hosts on two experiment VLANs
/// joined by a router.
pub mod scenarios {
    use super::*;

    pub const EXPERIMENT: &str = "foobar";

    pub fn two_vlan_topology(builder: ExperimentBuilder) -> ExperimentBuilder {
        builder
            .vm(
                "nids",
                &[
                    IfaceFixture::new("eth0", "MGMT").bridge("phenix"),
                    IfaceFixture::new("eth1", "MIRROR").bridge("phenix"),
                ],
            )
            .vm("host1", &[IfaceFixture::new("eth0", "EXP_1").bridge("phenix")])
            .vm("host2", &[IfaceFixture::new("eth0", "EXP_2").bridge("phenix")])
            .router(
                "rtr1",
                &[
                    IfaceFixture::new("eth0", "EXP_1").bridge("phenix"),
                    IfaceFixture::new("eth1", "EXP_2").bridge("phenix"),
                ],
            )
            .vlan("MGMT", 100)
            .vlan("EXP_1", 101)
            .vlan("EXP_2", 102)
            .vlan("MIRROR", 200)
            .schedule("nids", "kvm1")
            .schedule("host1", "kvm1")
            .schedule("rtr1", "kvm1")
            .schedule("host2", "kvm2")
    }

    /// `vm info` rows matching [`two_vlan_topology`].
    pub fn two_vlan_rows() -> Vec<FieldValues> {
        vec![
            vm_row("nids", &[("MGMT", 100), ("MIRROR", 200)], &["mega_tap0", "mega_tap1"]),
            vm_row("host1", &[("EXP_1", 101)], &["mega_tap2"]),
            vm_row("rtr1", &[("EXP_1", 101), ("EXP_2", 102)], &["mega_tap3", "mega_tap4"]),
            vm_row("host2", &[("EXP_2", 102)], &["mega_tap5"]),
        ]
    }
}
