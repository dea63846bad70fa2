//! configure phase tests

use phenix_app_common::AppError;
use phenix_app_mirror::{Experiment, Phase, PhaseDriver};
use phenix_app_test::{
    scenarios::{two_vlan_rows, two_vlan_topology, EXPERIMENT},
    ExperimentBuilder, IfaceFixture, MockCluster,
};
use pretty_assertions::assert_eq;
use serde_json::json;

async fn configure(exp: &mut Experiment) -> Result<(), AppError> {
    let mock = MockCluster::new().with_rows(two_vlan_rows());
    PhaseDriver::new(&mock, &mock, &mock)
        .run(Phase::Configure, exp)
        .await
        .map(|_| ())
}

#[tokio::test]
async fn test_addresses_follow_target_order() {
    let exp = two_vlan_topology(ExperimentBuilder::new(EXPERIMENT))
        .direct_gre()
        .target("nids", "eth1", &["EXP_1"])
        .target("host1", "eth9", &["EXP_2"])
        .target("host2", "eth9", &["EXP_1"])
        .build();

    let mut first = Experiment::from_value(exp.clone()).unwrap();
    let mut second = Experiment::from_value(exp).unwrap();
    configure(&mut first).await.unwrap();
    configure(&mut second).await.unwrap();

    let address = |exp: &Experiment, vm: &str, iface: &str| {
        exp.find_node(vm)
            .and_then(|n| n.interface(iface))
            .map(|(_, i)| i.address.clone())
            .unwrap()
    };

    assert_eq!(address(&first, "nids", "eth1"), "172.30.255.254");
    assert_eq!(address(&first, "host1", "eth9"), "172.30.255.253");
    assert_eq!(address(&first, "host2", "eth9"), "172.30.255.252");

    assert_eq!(first.to_vec().unwrap(), second.to_vec().unwrap());
}

/// A new monitoring interface lands on the mirror VLAN and bridge
#[tokio::test]
async fn test_new_interface_is_appended() {
    let exp = two_vlan_topology(ExperimentBuilder::new(EXPERIMENT))
        .direct_gre()
        .target("host1", "eth1", &["EXP_2"])
        .build();
    let mut exp = Experiment::from_value(exp).unwrap();

    configure(&mut exp).await.unwrap();

    let node = exp.find_node("host1").unwrap();
    let (idx, iface) = node.interface("eth1").unwrap();
    assert_eq!(idx, 1);
    assert_eq!(iface.iface_type, "ethernet");
    assert_eq!(iface.vlan, "mirror");
    assert_eq!(iface.bridge, "phenix");
    assert_eq!(iface.proto, "static");
    assert_eq!(iface.mask, 16);
}

#[tokio::test]
async fn test_existing_gateway_is_cleared() {
    let exp = ExperimentBuilder::new(EXPERIMENT)
        .vm("nids", &[IfaceFixture::new("eth1", "MIRROR").address("192.168.1.10", 24)])
        .direct_gre()
        .target("nids", "eth1", &["EXP_1"])
        .build();
    let mut json_exp = exp;
    json_exp["spec"]["topology"]["nodes"][0]["network"]["interfaces"][0]["gateway"] =
        json!("192.168.1.1");
    let mut exp = Experiment::from_value(json_exp).unwrap();

    configure(&mut exp).await.unwrap();

    let (_, iface) = exp.find_node("nids").unwrap().interface("eth1").unwrap();
    assert_eq!(iface.address, "172.30.255.254");
    assert!(iface.gateway.is_empty());
}

#[tokio::test]
async fn test_unknown_target_leaves_experiment_unchanged() {
    let exp = two_vlan_topology(ExperimentBuilder::new(EXPERIMENT))
        .direct_gre()
        .target("nids", "eth1", &["EXP_1"])
        .target("ghost", "eth1", &["EXP_1"])
        .build();
    let mut exp = Experiment::from_value(exp).unwrap();
    let before = exp.to_vec().unwrap();

    let err = configure(&mut exp).await.unwrap_err();

    assert!(matches!(err, AppError::UnknownHost { ref hostname } if hostname == "ghost"));
    assert_eq!(exp.to_vec().unwrap(), before);
}

#[tokio::test]
async fn test_missing_interface() {
    let exp = two_vlan_topology(ExperimentBuilder::new(EXPERIMENT))
        .direct_gre()
        .target_metadata("nids", json!({"vlans": ["EXP_1"]}))
        .build();
    let mut exp = Experiment::from_value(exp).unwrap();

    let err = configure(&mut exp).await.unwrap_err();
    assert!(matches!(err, AppError::MissingInterface { .. }));
}

#[tokio::test]
async fn test_invalid_mirror_net() {
    for (net, bad_mask) in [
        ("172.30.0.0/40", true),
        ("172.30.0.0/x", true),
        ("not-an-ip/16", false),
        ("not-an-ip", false),
    ] {
        let exp = two_vlan_topology(ExperimentBuilder::new(EXPERIMENT))
            .mirror(json!({"directGRE": {"enabled": true, "mirrorNet": net}}))
            .target("nids", "eth1", &["EXP_1"])
            .build();
        let mut exp = Experiment::from_value(exp).unwrap();

        let err = configure(&mut exp).await.unwrap_err();
        if bad_mask {
            assert!(matches!(err, AppError::InvalidMask { .. }), "{}: {}", net, err);
        } else {
            assert!(matches!(err, AppError::InvalidNetwork { .. }), "{}: {}", net, err);
        }
    }
}

#[tokio::test]
async fn test_bad_app_metadata() {
    let exp = two_vlan_topology(ExperimentBuilder::new(EXPERIMENT))
        .mirror(json!({"directGRE": {"enabled": "yes"}}))
        .target("nids", "eth1", &["EXP_1"])
        .build();
    let mut exp = Experiment::from_value(exp).unwrap();

    let err = configure(&mut exp).await.unwrap_err();
    assert!(matches!(err, AppError::MetadataDecode { .. }));
}

/// Without a mirror app every phase leaves the experiment and the cluster
/// untouched
#[tokio::test]
async fn test_no_mirror_app() {
    let exp = two_vlan_topology(ExperimentBuilder::new(EXPERIMENT)).build();
    let mut exp = Experiment::from_value(exp).unwrap();
    let before = exp.to_vec().unwrap();

    let mock = MockCluster::new().with_rows(two_vlan_rows());
    let driver = PhaseDriver::new(&mock, &mock, &mock);

    for (_, phase) in Phase::TABLE {
        let summary = driver.run(phase, &mut exp).await.unwrap();
        assert_eq!(summary.dispatched, 0);
    }

    assert!(mock.attempted().is_empty());
    assert_eq!(exp.to_vec().unwrap(), before);
}
