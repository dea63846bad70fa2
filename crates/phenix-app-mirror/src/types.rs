//! Experiment descriptor and mirror app metadata.
//!
//! Only the fields the mirror app reads or writes are modelled. Everything
//! else is carried through `extra` maps so the descriptor written back to
//! phenix matches the one that was read, apart from `configure` mutations.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use phenix_app_common::{AppError, AppResult};

/// Name of the app entry in the scenario.
pub const APP_NAME: &str = "mirror";

/// Default mirror network when none is configured.
pub const DEFAULT_MIRROR_NET: &str = "172.30.0.0/16";

/// Default bridge the mirror network lives on.
pub const DEFAULT_MIRROR_BRIDGE: &str = "phenix";

/// Default VLAN alias for the mirror network.
pub const DEFAULT_MIRROR_VLAN: &str = "mirror";

/// Cluster host → VMs scheduled on it.
pub type ClusterMap = BTreeMap<String, Vec<String>>;

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// phenix writes empty maps and lists as `null`.
fn null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(d).map(Option::unwrap_or_default)
}

/// A phenix experiment as handed to user apps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Experiment {
    #[serde(default)]
    pub spec: ExperimentSpec,
    #[serde(
        default,
        deserialize_with = "null_default",
        skip_serializing_if = "ExperimentStatus::is_empty"
    )]
    pub status: ExperimentStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentSpec {
    #[serde(rename = "experimentName", default)]
    pub experiment_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<Topology>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<Scenario>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentStatus {
    /// VM → cluster host.
    #[serde(
        default,
        deserialize_with = "null_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub schedules: BTreeMap<String, String>,
    /// VLAN alias → VLAN ID.
    #[serde(
        default,
        deserialize_with = "null_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub vlans: BTreeMap<String, u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExperimentStatus {
    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty() && self.vlans.is_empty() && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default, deserialize_with = "null_default")]
    pub nodes: Vec<Node>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub network: Network,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct General {
    #[serde(default)]
    pub hostname: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    #[serde(default, deserialize_with = "null_default")]
    pub interfaces: Vec<Interface>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A VM network interface. The n-th interface is backed by the VM's
/// n-th tap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub iface_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vlan: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bridge: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub mask: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proto: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default, deserialize_with = "null_default")]
    pub apps: Vec<App>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    #[serde(
        default,
        deserialize_with = "null_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub hosts: Vec<AppHost>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A target VM listed under the app.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppHost {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppHost {
    /// Decodes this host's mirror metadata.
    pub fn mirror_metadata(&self) -> AppResult<MirrorHostMetadata> {
        decode_metadata(&self.hostname, &self.metadata)
    }
}

/// Decodes app or host metadata, treating `null` as all defaults.
pub fn decode_metadata<T>(subject: &str, value: &Value) -> AppResult<T>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }

    T::deserialize(value).map_err(|e| AppError::metadata(subject, e))
}

impl Experiment {
    /// Parses an experiment from raw JSON.
    pub fn from_slice(body: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(body).map_err(|source| AppError::DescriptorDecode { source })
    }

    /// Parses an experiment from an already decoded JSON value.
    pub fn from_value(value: Value) -> AppResult<Self> {
        serde_json::from_value(value).map_err(|source| AppError::DescriptorDecode { source })
    }

    /// Serializes the experiment back to JSON.
    pub fn to_vec(&self) -> AppResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|source| AppError::Encode { source })
    }

    /// The experiment name, also used as the minimega namespace.
    pub fn name(&self) -> &str {
        &self.spec.experiment_name
    }

    pub fn nodes(&self) -> &[Node] {
        self.spec
            .topology
            .as_ref()
            .map(|t| t.nodes.as_slice())
            .unwrap_or_default()
    }

    pub fn find_node(&self, hostname: &str) -> Option<&Node> {
        self.nodes().iter().find(|n| n.hostname() == hostname)
    }

    pub fn find_node_mut(&mut self, hostname: &str) -> Option<&mut Node> {
        self.spec
            .topology
            .as_mut()?
            .nodes
            .iter_mut()
            .find(|n| n.hostname() == hostname)
    }

    /// Returns the scenario app with the given name.
    pub fn app(&self, name: &str) -> Option<&App> {
        self.spec
            .scenario
            .as_ref()?
            .apps
            .iter()
            .find(|a| a.name == name)
    }

    /// Cluster host a VM is scheduled on.
    pub fn schedule(&self, vm: &str) -> Option<&str> {
        self.status
            .schedules
            .get(vm)
            .map(String::as_str)
            .filter(|h| !h.is_empty())
    }

    /// Groups scheduled VMs by cluster host. Both hosts and VMs iterate in
    /// name order, so repeated calls within a phase agree.
    pub fn cluster(&self) -> ClusterMap {
        let mut cluster = ClusterMap::new();

        for (vm, host) in &self.status.schedules {
            cluster.entry(host.clone()).or_default().push(vm.clone());
        }

        cluster
    }

    /// Resolves VLAN aliases to IDs, silently dropping unknown aliases.
    pub fn vlan_ids(&self, aliases: &[String]) -> Vec<u32> {
        aliases
            .iter()
            .filter_map(|alias| self.status.vlans.get(alias).copied())
            .collect()
    }
}

impl Node {
    pub fn hostname(&self) -> &str {
        &self.general.hostname
    }

    /// Routers and firewalls forward between VLANs, so mirroring them
    /// alongside hosts on several VLANs duplicates packets.
    pub fn is_router_or_firewall(&self) -> bool {
        self.node_type.eq_ignore_ascii_case("router")
            || self.node_type.eq_ignore_ascii_case("firewall")
    }

    /// Finds an interface by name along with its position.
    pub fn interface(&self, name: &str) -> Option<(usize, &Interface)> {
        self.network
            .interfaces
            .iter()
            .enumerate()
            .find(|(_, i)| i.name == name)
    }

    /// Returns the named interface, appending a new one on `vlan` if the
    /// node does not have it yet.
    pub fn interface_or_insert(&mut self, kind: &str, name: &str, vlan: &str) -> &mut Interface {
        let idx = match self.network.interfaces.iter().position(|i| i.name == name) {
            Some(idx) => idx,
            None => {
                self.network.interfaces.push(Interface {
                    name: name.to_string(),
                    iface_type: kind.to_string(),
                    vlan: vlan.to_string(),
                    ..Default::default()
                });
                self.network.interfaces.len() - 1
            }
        };

        &mut self.network.interfaces[idx]
    }
}

/// `metadata` of the mirror app entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorAppMetadata {
    #[serde(rename = "directGRE", default)]
    pub direct_gre: DirectGre,
}

impl MirrorAppMetadata {
    /// Decodes app metadata and fills in defaults for empty fields.
    pub fn decode(value: &Value) -> AppResult<Self> {
        let mut amd: Self = decode_metadata("app", value)?;
        amd.direct_gre.apply_defaults();
        Ok(amd)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectGre {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "mirrorNet", default = "default_mirror_net")]
    pub mirror_net: String,
    #[serde(rename = "mirrorBridge", default = "default_mirror_bridge")]
    pub mirror_bridge: String,
    #[serde(rename = "mirrorVLAN", default = "default_mirror_vlan")]
    pub mirror_vlan: String,
    #[serde(default)]
    pub erspan: Erspan,
}

impl DirectGre {
    /// Replaces empty strings with their defaults.
    fn apply_defaults(&mut self) {
        if self.mirror_net.is_empty() {
            self.mirror_net = default_mirror_net();
        }

        if self.mirror_bridge.is_empty() {
            self.mirror_bridge = default_mirror_bridge();
        }

        if self.mirror_vlan.is_empty() {
            self.mirror_vlan = default_mirror_vlan();
        }
    }
}

impl Default for DirectGre {
    fn default() -> Self {
        Self {
            enabled: false,
            mirror_net: default_mirror_net(),
            mirror_bridge: default_mirror_bridge(),
            mirror_vlan: default_mirror_vlan(),
            erspan: Erspan::default(),
        }
    }
}

fn default_mirror_net() -> String {
    DEFAULT_MIRROR_NET.to_string()
}

fn default_mirror_bridge() -> String {
    DEFAULT_MIRROR_BRIDGE.to_string()
}

fn default_mirror_vlan() -> String {
    DEFAULT_MIRROR_VLAN.to_string()
}

/// ERSPAN session parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erspan {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub direction: i64,
    #[serde(rename = "hwid", default)]
    pub hardware_id: i64,
}

/// `metadata` of a target host entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorHostMetadata {
    /// Monitoring NIC on the target VM.
    #[serde(default)]
    pub interface: String,
    /// VLAN aliases to mirror.
    #[serde(default)]
    pub vlans: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn experiment() -> Experiment {
        Experiment::from_value(json!({
            "metadata": {"name": "foobar"},
            "spec": {
                "experimentName": "foobar",
                "baseDir": "/phenix",
                "topology": {"nodes": [
                    {"type": "Router", "general": {"hostname": "rtr"},
                     "network": {"interfaces": [{"name": "eth0", "vlan": "EXP_1"}]}},
                    {"type": "VirtualMachine", "general": {"hostname": "nids", "vcpus": 2},
                     "network": {"interfaces": [
                        {"name": "eth0", "vlan": "EXP_1", "bridge": "phenix", "address": "10.0.0.5", "mask": 24, "autostart": true}
                     ]}}
                ]},
                "scenario": {"apps": [{"name": "mirror", "hosts": [{"hostname": "nids"}]}]}
            },
            "status": {
                "schedules": {"nids": "kvm2", "rtr": "kvm1", "vm1": "kvm1"},
                "vlans": {"EXP_1": 101, "EXP_2": 102}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_unknown_fields_survive() {
        let exp = experiment();
        let out: Value = serde_json::from_slice(&exp.to_vec().unwrap()).unwrap();

        assert_eq!(out["metadata"]["name"], "foobar");
        assert_eq!(out["spec"]["baseDir"], "/phenix");
        assert_eq!(out["spec"]["topology"]["nodes"][1]["general"]["vcpus"], 2);
        assert_eq!(
            out["spec"]["topology"]["nodes"][1]["network"]["interfaces"][0]["autostart"],
            true
        );
        assert_eq!(
            out["spec"]["topology"]["nodes"][1]["network"]["interfaces"][0]["mask"],
            24
        );
    }

    #[test]
    fn test_null_collections_decode_as_empty() {
        let exp = Experiment::from_value(json!({
            "spec": {
                "experimentName": "foobar",
                "topology": {"nodes": [
                    {"type": "VirtualMachine", "general": {"hostname": "nids"},
                     "network": {"interfaces": null}}
                ]},
                "scenario": {"apps": [{"name": "mirror", "hosts": null}]}
            },
            "status": {"schedules": null, "vlans": null}
        }))
        .unwrap();

        assert!(exp.status.schedules.is_empty());
        assert!(exp.status.vlans.is_empty());
        assert!(exp.cluster().is_empty());
        assert!(exp.find_node("nids").unwrap().network.interfaces.is_empty());
        assert!(exp.app(APP_NAME).unwrap().hosts.is_empty());

        let exp = Experiment::from_value(json!({
            "spec": {"topology": {"nodes": null}, "scenario": {"apps": null}},
            "status": null
        }))
        .unwrap();
        assert!(exp.find_node("nids").is_none());
        assert!(exp.app(APP_NAME).is_none());
        assert!(exp.status.is_empty());
    }

    #[test]
    fn test_cluster_map() {
        let cluster = experiment().cluster();
        assert_eq!(cluster.keys().collect::<Vec<_>>(), vec!["kvm1", "kvm2"]);
        assert_eq!(cluster["kvm1"], vec!["rtr", "vm1"]);
        assert_eq!(cluster["kvm2"], vec!["nids"]);
    }

    #[test]
    fn test_vlan_ids_drop_unknown() {
        let exp = experiment();
        let aliases = vec!["EXP_2".to_string(), "NOPE".to_string(), "EXP_1".to_string()];
        assert_eq!(exp.vlan_ids(&aliases), vec![102, 101]);
    }

    #[test]
    fn test_router_detection_ignores_case() {
        let exp = experiment();
        assert!(exp.find_node("rtr").unwrap().is_router_or_firewall());
        assert!(!exp.find_node("nids").unwrap().is_router_or_firewall());

        let fw = Node {
            node_type: "FIREWALL".to_string(),
            ..Default::default()
        };
        assert!(fw.is_router_or_firewall());
    }

    #[test]
    fn test_interface_or_insert() {
        let mut exp = experiment();
        let node = exp.find_node_mut("nids").unwrap();

        node.interface_or_insert("ethernet", "eth1", "mirror");
        assert_eq!(node.network.interfaces.len(), 2);

        let (idx, iface) = node.interface("eth1").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(iface.iface_type, "ethernet");
        assert_eq!(iface.vlan, "mirror");

        // Existing interfaces are returned untouched.
        node.interface_or_insert("ethernet", "eth0", "mirror");
        assert_eq!(node.network.interfaces.len(), 2);
        assert_eq!(node.interface("eth0").unwrap().1.vlan, "EXP_1");
    }

    #[test]
    fn test_app_metadata_defaults() {
        let amd = MirrorAppMetadata::decode(&Value::Null).unwrap();
        assert!(!amd.direct_gre.enabled);
        assert_eq!(amd.direct_gre.mirror_net, "172.30.0.0/16");
        assert_eq!(amd.direct_gre.mirror_bridge, "phenix");
        assert_eq!(amd.direct_gre.mirror_vlan, "mirror");

        let amd = MirrorAppMetadata::decode(&json!({
            "directGRE": {"enabled": true, "mirrorNet": "", "mirrorBridge": "mirbr",
                          "erspan": {"enabled": true, "version": 2, "direction": 1, "hwid": 7}}
        }))
        .unwrap();
        assert!(amd.direct_gre.enabled);
        assert_eq!(amd.direct_gre.mirror_net, "172.30.0.0/16");
        assert_eq!(amd.direct_gre.mirror_bridge, "mirbr");
        assert_eq!(amd.direct_gre.erspan.hardware_id, 7);
    }

    #[test]
    fn test_host_metadata_decode_error() {
        let host = AppHost {
            hostname: "nids".to_string(),
            metadata: json!({"vlans": "EXP_1"}),
            ..Default::default()
        };
        assert!(matches!(
            host.mirror_metadata(),
            Err(AppError::MetadataDecode { ref subject, .. }) if subject == "nids"
        ));
    }

    #[test]
    fn test_unscheduled_vm() {
        let exp = experiment();
        assert_eq!(exp.schedule("nids"), Some("kvm2"));
        assert_eq!(exp.schedule("ghost"), None);
    }
}
