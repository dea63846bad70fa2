//! Command builders for minimega taps and OVS bridges/tunnels/mirrors.

use std::fmt;
use std::net::IpAddr;

use phenix_app_common::{AppError, AppResult};

use crate::names::mirror_tap_name;
use crate::types::Erspan;

/// Prefix for `ovs-vsctl` commands run through minimega.
pub const OVS_VSCTL: &str = "shell ovs-vsctl";

/// Prefix for `ovs-ofctl` commands run through minimega.
pub const OVS_OFCTL: &str = "shell ovs-ofctl";

/// Encapsulation used by direct-GRE tunnels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelKind {
    Gre,
    ErspanV1 { index: i64 },
    ErspanV2 { direction: i64, hardware_id: i64 },
}

impl TunnelKind {
    /// Picks the encapsulation from the ERSPAN settings.
    pub fn from_erspan(erspan: &Erspan, hostname: &str) -> AppResult<Self> {
        if !erspan.enabled {
            return Ok(TunnelKind::Gre);
        }

        match erspan.version {
            1 => Ok(TunnelKind::ErspanV1 {
                index: erspan.index,
            }),
            2 => Ok(TunnelKind::ErspanV2 {
                direction: erspan.direction,
                hardware_id: erspan.hardware_id,
            }),
            version => Err(AppError::InvalidErspanVersion {
                version,
                hostname: hostname.to_string(),
            }),
        }
    }
}

impl fmt::Display for TunnelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelKind::Gre => f.write_str("GRE"),
            TunnelKind::ErspanV1 { .. } | TunnelKind::ErspanV2 { .. } => f.write_str("ERSPAN"),
        }
    }
}

/// Build mirror-network tap creation command
pub fn build_tap_create_cmd(exp: &str, vlan: &str, bridge: &str, ip: IpAddr, mask: u8) -> String {
    format!(
        "tap create {}//{} bridge {} ip {}/{} {}",
        exp,
        vlan,
        bridge,
        ip,
        mask,
        mirror_tap_name(exp)
    )
}

/// Build mirror-network tap deletion command
pub fn build_tap_delete_cmd(exp: &str) -> String {
    format!("tap delete {}", mirror_tap_name(exp))
}

/// Build direct tunnel creation command towards a target VM
pub fn build_add_tunnel_cmd(bridge: &str, name: &str, remote_ip: IpAddr, kind: &TunnelKind) -> String {
    let options = match kind {
        TunnelKind::Gre => format!("type=gre options:remote_ip={}", remote_ip),
        TunnelKind::ErspanV1 { index } => format!(
            "type=erspan options:remote_ip={} options:erspan_ver=1 options:erspan_idx={}",
            remote_ip, index
        ),
        TunnelKind::ErspanV2 {
            direction,
            hardware_id,
        } => format!(
            "type=erspan options:remote_ip={} options:erspan_ver=2 options:erspan_dir={} options:erspan_hwid={}",
            remote_ip, direction, hardware_id
        ),
    };

    format!(
        "{} add-port {} {} -- set interface {} {}",
        OVS_VSCTL, bridge, name, name, options
    )
}

/// Build flow-based GRE tunnel creation command
///
/// The remote endpoint is chosen per packet by OpenFlow, so one port
/// terminates tunnels from every other cluster host.
pub fn build_add_flow_tunnel_cmd(bridge: &str, name: &str, key: u32) -> String {
    format!(
        "{} add-port {} {} -- set interface {} type=gre options:remote_ip=flow options:key={}",
        OVS_VSCTL, bridge, name, name, key
    )
}

/// Build keyed GRE tunnel creation command towards a cluster host
pub fn build_add_keyed_tunnel_cmd(bridge: &str, name: &str, remote_ip: IpAddr, key: u32) -> String {
    format!(
        "{} add-port {} {} -- set interface {} type=gre options:remote_ip={} options:key={}",
        OVS_VSCTL, bridge, name, name, remote_ip, key
    )
}

/// Build RSTP enable command
pub fn build_enable_rstp_cmd(bridge: &str) -> String {
    format!("{} set bridge {} rstp-enable=true", OVS_VSCTL, bridge)
}

/// Build OpenFlow rule forwarding a tunnel port to a tap
pub fn build_add_flow_cmd(bridge: &str, in_port: &str, out_port: &str) -> String {
    format!(
        r#"{} add-flow {} "in_port={} actions=output:{}""#,
        OVS_OFCTL, bridge, in_port, out_port
    )
}

/// Build OpenFlow rule deletion command
pub fn build_del_flows_cmd(bridge: &str, in_port: &str) -> String {
    format!("{} del-flows {} in_port={}", OVS_OFCTL, bridge, in_port)
}

/// Build ingress-only mirror creation command
///
/// Every tap is a destination-port selector; `vlans` further restricts
/// which frames are copied to `out_port`. Returns `None` when there is
/// nothing to mirror.
pub fn build_mirror_cmd(
    name: &str,
    bridge: &str,
    out_port: &str,
    taps: &[String],
    vlans: &[u32],
) -> Option<String> {
    if taps.is_empty() {
        return None;
    }

    let mut command = vec![OVS_VSCTL.to_string()];
    let mut ids = Vec::with_capacity(taps.len());

    for (idx, tap) in taps.iter().enumerate() {
        let id = format!("@i{}", idx);
        command.push(format!("--id={} get port {}", id, tap));
        ids.push(id);
    }

    let vlans: Vec<String> = vlans.iter().map(u32::to_string).collect();

    command.push(format!("--id=@o get port {}", out_port));
    command.push(format!(
        "--id=@m create mirror name={} select-dst-port={} select-vlan={} output-port=@o",
        name,
        ids.join(","),
        vlans.join(",")
    ));
    command.push(format!("set bridge {} mirrors=@m", bridge));

    Some(command.join(" -- "))
}

/// Build mirror removal command
pub fn build_remove_mirror_cmd(name: &str, bridge: &str) -> String {
    format!(
        "{} -- --id=@m get mirror {} -- remove bridge {} mirrors @m",
        OVS_VSCTL, name, bridge
    )
}

/// Build bridge port deletion command
pub fn build_del_port_cmd(bridge: &str, name: &str) -> String {
    format!("{} del-port {} {}", OVS_VSCTL, bridge, name)
}
