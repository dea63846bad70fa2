//! MirrorMgr - builds the mirror plan for each lifecycle phase
//!
//! Two modes are supported:
//!
//! - **direct GRE**: every cluster host gets a tap on a dedicated mirror
//!   network and tunnels mirrored frames straight to each target VM's
//!   mirror-network address (optionally ERSPAN encapsulated).
//! - **indirect**: mirrored frames are tunnelled between cluster hosts to
//!   the host running the target VM and forwarded into the target's tap
//!   by an OpenFlow rule.

use std::net::IpAddr;

use tracing::{debug, error, info, warn};

use phenix_app_common::{AppError, AppResult, Destination, Inventory, Resolver};

use crate::commands::*;
use crate::mirror_net::MirrorNet;
use crate::names::tunnel_name;
use crate::plan::Plan;
use crate::taps;
use crate::types::{App, AppHost, Experiment, MirrorAppMetadata, MirrorHostMetadata, Node, APP_NAME};

/// Kind given to interfaces created on target VMs.
const MIRROR_IFACE_KIND: &str = "ethernet";

/// Addressing mode set on target monitoring interfaces.
const MIRROR_IFACE_PROTO: &str = "static";

/// MirrorMgr turns an experiment into per-phase command plans.
///
/// Building a plan reads live VM state and resolves cluster hosts but
/// never mutates the cluster; the phase driver dispatches the result.
pub struct MirrorMgr<'a> {
    inventory: &'a dyn Inventory,
    resolver: &'a dyn Resolver,
}

impl<'a> MirrorMgr<'a> {
    pub fn new(inventory: &'a dyn Inventory, resolver: &'a dyn Resolver) -> Self {
        Self {
            inventory,
            resolver,
        }
    }

    /// Assigns mirror-network addresses to target monitoring interfaces.
    ///
    /// Targets are addressed from the top of the mirror network downwards
    /// in app host order. Every target is validated before the topology is
    /// touched, so an error leaves the experiment unchanged.
    pub fn configure(&self, exp: &mut Experiment) -> AppResult<()> {
        let Some((app, amd)) = mirror_app(exp)? else {
            return Ok(());
        };

        if !amd.direct_gre.enabled {
            debug!("Direct GRE disabled; nothing to configure");
            return Ok(());
        }

        let gre = &amd.direct_gre;
        let net = MirrorNet::parse(&gre.mirror_net)?;

        let mut assignments = Vec::with_capacity(app.hosts.len());
        let mut ip = net.last();

        for host in &app.hosts {
            let hmd = host.mirror_metadata()?;

            if hmd.interface.is_empty() {
                return Err(AppError::missing_interface(&host.hostname));
            }

            if exp.find_node(&host.hostname).is_none() {
                return Err(AppError::unknown_host(&host.hostname));
            }

            assignments.push((host.hostname.clone(), hmd.interface, ip));
            ip = net.prev(ip);
        }

        for (hostname, iface_name, ip) in assignments {
            let node = exp
                .find_node_mut(&hostname)
                .ok_or_else(|| AppError::unknown_host(&hostname))?;

            let iface = node.interface_or_insert(MIRROR_IFACE_KIND, &iface_name, &gre.mirror_vlan);
            iface.bridge = gre.mirror_bridge.clone();
            iface.proto = MIRROR_IFACE_PROTO.to_string();
            iface.address = ip.to_string();
            iface.mask = u32::from(net.mask());
            iface.gateway.clear();

            info!(
                target_vm = %hostname,
                interface = %iface_name,
                address = %ip,
                "Assigned mirror network address"
            );
        }

        Ok(())
    }

    /// Builds the post-start plan for whichever mode is configured.
    pub async fn post_start(&self, exp: &Experiment) -> AppResult<Plan> {
        let Some((app, amd)) = mirror_app(exp)? else {
            return Ok(Plan::new());
        };

        if amd.direct_gre.enabled {
            self.post_start_gre(exp, &app.hosts, &amd).await
        } else {
            self.post_start_indirect(exp, &app.hosts).await
        }
    }

    /// Builds the cleanup plan for whichever mode is configured.
    pub fn cleanup(&self, exp: &Experiment) -> AppResult<Plan> {
        let Some((app, amd)) = mirror_app(exp)? else {
            return Ok(Plan::new());
        };

        if amd.direct_gre.enabled {
            Ok(cleanup_gre(exp, &app.hosts, &amd))
        } else {
            Ok(cleanup_indirect(exp, &app.hosts))
        }
    }

    async fn post_start_gre(
        &self,
        exp: &Experiment,
        hosts: &[AppHost],
        amd: &MirrorAppMetadata,
    ) -> AppResult<Plan> {
        let gre = &amd.direct_gre;
        let net = MirrorNet::parse(&gre.mirror_net)?;
        let cluster = exp.cluster();
        let ns = exp.name();

        let mut plan = Plan::new();

        // Cluster hosts are addressed from the bottom of the mirror network.
        let mut ip = net.first();

        for host in cluster.keys() {
            plan.fatal(
                Destination::host(host),
                build_tap_create_cmd(ns, &gre.mirror_vlan, &gre.mirror_bridge, ip, net.mask()),
                format!("creating tap on cluster host {}", host),
            );

            ip = net.next(ip);
        }

        for host in hosts {
            let Some((node, hmd)) = resolve_target(exp, host) else {
                continue;
            };

            let remote_ip = node
                .interface(&hmd.interface)
                .and_then(|(_, iface)| iface.address.parse::<IpAddr>().ok());

            let Some(remote_ip) = remote_ip else {
                error!(target_vm = %host.hostname, interface = %hmd.interface, "No target interface IP configured");
                continue;
            };

            let kind = TunnelKind::from_erspan(&gre.erspan, &host.hostname)?;
            let vlans = exp.vlan_ids(&hmd.vlans);
            let name = tunnel_name(ns, &host.hostname);

            for (c, vms) in &cluster {
                let dest = Destination::host(c);

                plan.fatal(
                    dest.clone(),
                    build_add_tunnel_cmd(&gre.mirror_bridge, &name, remote_ip, &kind),
                    format!("adding {} tunnel {} from cluster host {}", kind, name, c),
                );

                let vms = source_vms(exp, vms, &vlans);

                match self
                    .mirror_command(ns, &name, &gre.mirror_bridge, &name, &vms, &vlans)
                    .await
                {
                    Some(cmd) => plan.logged(
                        dest,
                        cmd,
                        format!("adding ingress-only mirror {} on cluster host {}", name, c),
                    ),
                    None => info!(
                        host = %c,
                        vlans = ?hmd.vlans,
                        "No VMs scheduled on cluster host with interfaces in mirrored VLANs"
                    ),
                }
            }
        }

        Ok(plan)
    }

    async fn post_start_indirect(&self, exp: &Experiment, hosts: &[AppHost]) -> AppResult<Plan> {
        let cluster = exp.cluster();
        let ns = exp.name();

        let mut plan = Plan::new();

        for host in hosts {
            let Some((node, hmd)) = resolve_target(exp, host) else {
                continue;
            };

            let hostname = host.hostname.as_str();

            let Some((idx, iface)) = node.interface(&hmd.interface) else {
                error!(target_vm = %hostname, interface = %hmd.interface, "Target interface not found");
                continue;
            };

            let bridge = iface.bridge.as_str();

            let vm_taps = match taps::vm_taps(self.inventory, ns, hostname).await {
                Ok(taps) => taps,
                Err(e) => {
                    warn!(target_vm = %hostname, error = %e, "Querying target taps");
                    Vec::new()
                }
            };

            let Some(monitor_tap) = vm_taps.get(idx) else {
                error!(target_vm = %hostname, interface = %hmd.interface, "Target interface not configured");
                continue;
            };

            let vlans = exp.vlan_ids(&hmd.vlans);

            let Some(scheduled) = exp.schedule(hostname) else {
                error!(target_vm = %hostname, "Target is not scheduled in the experiment");
                continue;
            };

            // Tunnels are only needed when mirrored VMs can live on another
            // cluster host.
            if cluster.len() > 1 {
                let remote = self
                    .resolver
                    .lookup(scheduled)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| AppError::UnresolvableHost {
                        host: scheduled.to_string(),
                    })?;

                let key: u32 = rand::random();
                let local = Destination::host(scheduled);

                plan.fatal(
                    local.clone(),
                    build_enable_rstp_cmd(bridge),
                    format!("enabling RSTP for bridge on cluster host {}", scheduled),
                );
                plan.fatal(
                    local.clone(),
                    build_add_flow_tunnel_cmd(bridge, hostname, key),
                    format!("adding GRE flow tunnel {} on cluster host {}", hostname, scheduled),
                );
                plan.fatal(
                    local,
                    build_add_flow_cmd(bridge, hostname, monitor_tap),
                    format!("adding OpenFlow flow rule for {} on cluster host {}", hostname, scheduled),
                );

                for (c, vms) in cluster.iter().filter(|(c, _)| c.as_str() != scheduled) {
                    let dest = Destination::host(c);

                    plan.fatal(
                        dest.clone(),
                        build_enable_rstp_cmd(bridge),
                        format!("enabling RSTP for bridge on cluster host {}", c),
                    );
                    plan.fatal(
                        dest.clone(),
                        build_add_keyed_tunnel_cmd(bridge, hostname, remote, key),
                        format!("adding GRE tunnel {} from cluster host {}", hostname, c),
                    );

                    let vms = source_vms(exp, vms, &vlans);

                    match self
                        .mirror_command(ns, hostname, bridge, hostname, &vms, &vlans)
                        .await
                    {
                        Some(cmd) => plan.fatal(
                            dest,
                            cmd,
                            format!("adding ingress-only mirror {} on cluster host {}", hostname, c),
                        ),
                        None => info!(
                            host = %c,
                            vlans = ?hmd.vlans,
                            "No VMs scheduled on cluster host with interfaces in mirrored VLANs"
                        ),
                    }
                }
            }

            let local_vms = cluster
                .get(scheduled)
                .map(|vms| source_vms(exp, vms, &vlans))
                .unwrap_or_default();

            match self
                .mirror_command(ns, hostname, bridge, monitor_tap, &local_vms, &vlans)
                .await
            {
                Some(cmd) => plan.fatal(
                    Destination::host(scheduled),
                    cmd,
                    format!("adding ingress-only mirror {} on cluster host {}", hostname, scheduled),
                ),
                None => info!(
                    host = %scheduled,
                    vlans = ?hmd.vlans,
                    "No VMs scheduled on cluster host with interfaces in mirrored VLANs"
                ),
            }
        }

        Ok(plan)
    }

    /// Selects source taps and assembles the mirror command, if any.
    async fn mirror_command(
        &self,
        ns: &str,
        name: &str,
        bridge: &str,
        out_port: &str,
        vms: &[String],
        vlans: &[u32],
    ) -> Option<String> {
        let taps = match taps::vlan_taps(self.inventory, ns, vms, vlans).await {
            Ok(taps) => taps,
            Err(e) => {
                warn!(mirror = %name, error = %e, "Querying source taps");
                Vec::new()
            }
        };

        build_mirror_cmd(name, bridge, out_port, &taps, vlans)
    }
}

fn cleanup_gre(exp: &Experiment, hosts: &[AppHost], amd: &MirrorAppMetadata) -> Plan {
    let bridge = &amd.direct_gre.mirror_bridge;
    let mut plan = Plan::new();

    for host in hosts {
        // Shared by the GRE tunnel port and the mirror.
        let name = tunnel_name(exp.name(), &host.hostname);

        plan.logged(
            Destination::All,
            build_remove_mirror_cmd(&name, bridge),
            format!("removing mirror {} on all cluster hosts", name),
        );
        plan.logged(
            Destination::All,
            build_del_port_cmd(bridge, &name),
            format!("deleting tunnel {} on all cluster hosts", name),
        );
    }

    plan.fatal(
        Destination::All,
        build_tap_delete_cmd(exp.name()),
        "deleting tap on all cluster hosts",
    );

    plan
}

fn cleanup_indirect(exp: &Experiment, hosts: &[AppHost]) -> Plan {
    let multi_host = exp.cluster().len() > 1;
    let mut plan = Plan::new();

    for host in hosts {
        let Some((node, hmd)) = resolve_target(exp, host) else {
            continue;
        };

        let hostname = host.hostname.as_str();

        let bridge = node
            .interface(&hmd.interface)
            .map(|(_, iface)| iface.bridge.as_str())
            .filter(|b| !b.is_empty());

        let Some(bridge) = bridge else {
            error!(target_vm = %hostname, interface = %hmd.interface, "Target interface not found");
            continue;
        };

        plan.logged(
            Destination::All,
            build_remove_mirror_cmd(hostname, bridge),
            format!("removing mirror {} on all cluster hosts", hostname),
        );

        if multi_host {
            match exp.schedule(hostname) {
                Some(scheduled) => plan.logged(
                    Destination::host(scheduled),
                    build_del_flows_cmd(bridge, hostname),
                    format!("deleting OpenFlow flow rule for {} on cluster host {}", hostname, scheduled),
                ),
                None => warn!(target_vm = %hostname, "Target is not scheduled; skipping flow rule removal"),
            }

            plan.logged(
                Destination::All,
                build_del_port_cmd(bridge, hostname),
                format!("deleting GRE tunnel {} on all cluster hosts", hostname),
            );
        }
    }

    plan
}

/// Finds the mirror app and decodes its metadata.
fn mirror_app(exp: &Experiment) -> AppResult<Option<(&App, MirrorAppMetadata)>> {
    let Some(app) = exp.app(APP_NAME) else {
        info!("No {} app in scenario; nothing to do", APP_NAME);
        return Ok(None);
    };

    let amd = MirrorAppMetadata::decode(&app.metadata)?;

    Ok(Some((app, amd)))
}

/// Decodes a target's metadata and finds its node, logging why a target
/// is skipped.
fn resolve_target<'e>(exp: &'e Experiment, host: &AppHost) -> Option<(&'e Node, MirrorHostMetadata)> {
    let hmd = match host.mirror_metadata() {
        Ok(hmd) => hmd,
        Err(e) => {
            error!(target_vm = %host.hostname, error = %e, "Decoding host metadata");
            return None;
        }
    };

    let Some(node) = exp.find_node(&host.hostname) else {
        error!(target_vm = %host.hostname, "No node found in topology");
        return None;
    };

    if hmd.interface.is_empty() {
        error!(target_vm = %host.hostname, "No target interface provided");
        return None;
    }

    Some((node, hmd))
}

/// VMs whose taps may feed a mirror. When several VLANs are mirrored,
/// routers and firewalls are left out since they would duplicate every
/// packet crossing between the mirrored VLANs.
fn source_vms(exp: &Experiment, vms: &[String], vlans: &[u32]) -> Vec<String> {
    if vlans.len() <= 1 {
        return vms.to_vec();
    }

    vms.iter()
        .filter(|vm| !exp.find_node(vm).is_some_and(Node::is_router_or_firewall))
        .cloned()
        .collect()
}
