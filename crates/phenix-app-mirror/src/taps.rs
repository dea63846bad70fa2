//! Tap selection from live VM state.
//!
//! `vm info` reports each VM's VLANs as `[EXP_1 (101), EXP_2 (102)]` and
//! its taps as `[mega_tap0, mega_tap1]`; the i-th tap backs the i-th VLAN.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use phenix_app_common::{AppResult, FieldValuesExt, Inventory};

/// `vm info` column holding the VM name.
pub const COLUMN_NAME: &str = "name";

/// `vm info` column holding the VM's VLANs.
pub const COLUMN_VLAN: &str = "vlan";

/// `vm info` column holding the VM's taps.
pub const COLUMN_TAP: &str = "tap";

/// Matches `ALIAS (ID)`; group 2 is the numeric ID.
static VLAN_ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(.*) \((\d*)\)").expect("Invalid regex pattern"));

/// Splits a bracketed list like `[a, b, c]`. `[]` and the empty string
/// both yield an empty list.
pub fn parse_list(s: &str) -> Vec<String> {
    let s = s.strip_prefix('[').unwrap_or(s);
    let s = s.strip_suffix(']').unwrap_or(s);
    let s = s.trim();

    if s.is_empty() {
        return Vec::new();
    }

    s.split(", ").map(str::to_string).collect()
}

/// Extracts the ID from an `ALIAS (ID)` token.
pub fn vlan_id(token: &str) -> Option<&str> {
    VLAN_ALIAS_RE
        .captures(token)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str())
}

/// Returns the taps of `vms` that sit on any of `vlans`.
///
/// Order within a VM follows its interface order; order across VMs
/// follows inventory order.
pub async fn vlan_taps(
    inventory: &dyn Inventory,
    ns: &str,
    vms: &[String],
    vlans: &[u32],
) -> AppResult<Vec<String>> {
    let vm_set: HashSet<&str> = vms.iter().map(String::as_str).collect();
    let wanted: Vec<String> = vlans.iter().map(u32::to_string).collect();

    let mut taps = Vec::new();

    for row in inventory.vm_info(ns, None).await? {
        let vm = row.get_field_or(COLUMN_NAME, "");

        if !vm_set.contains(vm) {
            continue;
        }

        let vm_vlans = parse_list(row.get_field_or(COLUMN_VLAN, ""));
        let vm_taps = parse_list(row.get_field_or(COLUMN_TAP, ""));

        for (idx, alias) in vm_vlans.iter().enumerate() {
            let Some(id) = vlan_id(alias) else {
                continue;
            };

            if !wanted.iter().any(|w| w == id) {
                continue;
            }

            match vm_taps.get(idx) {
                Some(tap) => taps.push(tap.clone()),
                None => tracing::warn!(
                    vm = %vm,
                    vlan = %alias,
                    "VM reports more VLANs than taps; skipping interface {}",
                    idx
                ),
            }
        }
    }

    Ok(taps)
}

/// Returns the taps of a single VM in interface order.
pub async fn vm_taps(inventory: &dyn Inventory, ns: &str, vm: &str) -> AppResult<Vec<String>> {
    let rows = inventory.vm_info(ns, Some(vm)).await?;

    Ok(rows
        .first()
        .map(|row| parse_list(row.get_field_or(COLUMN_TAP, "")))
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use phenix_app_common::{field_values, FieldValues};

    struct Rows(Vec<FieldValues>);

    #[async_trait]
    impl Inventory for Rows {
        async fn vm_info(&self, _ns: &str, name: Option<&str>) -> AppResult<Vec<FieldValues>> {
            Ok(self
                .0
                .iter()
                .filter(|r| name.map_or(true, |n| r.get_field("name") == Some(n)))
                .cloned()
                .collect())
        }
    }

    fn inventory() -> Rows {
        Rows(vec![
            field_values! {
                "name" => "host1",
                "vlan" => "[EXP_1 (101), EXP_2 (102)]",
                "tap" => "[mega_tap0, mega_tap1]",
            },
            field_values! {
                "name" => "rtr1",
                "vlan" => "[EXP_1 (101), EXP_2 (102), EXP_3 (103)]",
                "tap" => "[mega_tap2, mega_tap3, mega_tap4]",
            },
            field_values! {
                "name" => "idle",
                "vlan" => "[]",
                "tap" => "[]",
            },
        ])
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("[a, b, c]"), vec!["a", "b", "c"]);
        assert_eq!(parse_list("[single]"), vec!["single"]);
        assert!(parse_list("[]").is_empty());
        assert!(parse_list("").is_empty());
        assert!(parse_list("[ ]").is_empty());
    }

    #[test]
    fn test_vlan_id() {
        assert_eq!(vlan_id("EXP_1 (101)"), Some("101"));
        assert_eq!(vlan_id("with space (7)"), Some("7"));
        assert_eq!(vlan_id("101"), None);
    }

    #[tokio::test]
    async fn test_vlan_taps_follow_inventory_order() {
        let taps = vlan_taps(&inventory(), "foobar", &names(&["rtr1", "host1"]), &[102, 101])
            .await
            .unwrap();
        assert_eq!(taps, vec!["mega_tap0", "mega_tap1", "mega_tap2", "mega_tap3"]);
    }

    #[tokio::test]
    async fn test_vlan_taps_filter_by_vm_and_vlan() {
        let taps = vlan_taps(&inventory(), "foobar", &names(&["rtr1"]), &[103])
            .await
            .unwrap();
        assert_eq!(taps, vec!["mega_tap4"]);

        let taps = vlan_taps(&inventory(), "foobar", &names(&["idle", "ghost"]), &[101])
            .await
            .unwrap();
        assert!(taps.is_empty());
    }

    #[tokio::test]
    async fn test_vm_taps() {
        let taps = vm_taps(&inventory(), "foobar", "rtr1").await.unwrap();
        assert_eq!(taps, vec!["mega_tap2", "mega_tap3", "mega_tap4"]);

        let taps = vm_taps(&inventory(), "foobar", "ghost").await.unwrap();
        assert!(taps.is_empty());
    }
}
