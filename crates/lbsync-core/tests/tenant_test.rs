#![allow(clippy::unwrap_used)]
// Tenant scope lifecycle: ownership, teardown ordering and blocked deletes.

mod common;

use pretty_assertions::assert_eq;

use common::{Harness, INTF, NAT_POOL, ROUTE, TENANT, VDOM, VIP_PORT, lb};
use lbsync_core::{CoreError, EntityKind, ProvisioningStatus, Request};

async fn create(h: &Harness, id: &str, vip: &str) {
    h.state.put_load_balancer(lb(id, TENANT, vip));
    h.orch
        .execute(Request::create(EntityKind::LoadBalancer, id))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_teardown_runs_in_reverse_order() {
    let h = Harness::start().await;
    create(&h, "lb1", "10.0.0.10").await;
    h.fake.clear_calls();

    h.orch
        .execute(Request::delete(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap();

    let detach = h.fake.position(|c| c.is("PUT", INTF)).unwrap();
    let route = h.fake.position(|c| c.is("DELETE", ROUTE)).unwrap();
    let vdom = h.fake.position(|c| c.is("DELETE", VDOM)).unwrap();
    assert!(detach < route);
    assert!(route < vdom);

    let port2 = h.fake.object(INTF, "", "", "port2").unwrap();
    assert_eq!(port2["vdom"], "root");
    assert_eq!(port2["ip"], "0.0.0.0/0");
    assert!(h.fake.vdoms().is_empty());
    assert!(h.fake.objects(ROUTE, TENANT, "").is_empty());
}

#[tokio::test]
async fn test_blocked_scope_delete_leaves_error_until_redriven() {
    let h = Harness::start().await;
    create(&h, "lb1", "10.0.0.10").await;
    h.fake.block_vdom_delete(true);

    let err = h
        .orch
        .execute(Request::delete(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::DependencyExists { .. }));
    assert_eq!(
        h.status(EntityKind::LoadBalancer, "lb1"),
        Some(ProvisioningStatus::Error)
    );
    assert_eq!(h.fake.vdoms(), vec![TENANT.to_owned()]);

    h.fake.block_vdom_delete(false);
    h.orch
        .execute(Request::delete(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap();

    assert!(h.fake.vdoms().is_empty());
    assert_eq!(h.status(EntityKind::LoadBalancer, "lb1"), None);
}

#[tokio::test]
async fn test_shared_scope_survives_until_last_load_balancer() {
    let h = Harness::start().await;
    create(&h, "lb1", "10.0.0.10").await;
    create(&h, "lb2", "10.0.0.11").await;
    assert_eq!(h.fake.count("POST", VDOM), 2);
    assert_eq!(h.fake.vdoms().len(), 1);

    h.orch
        .execute(Request::delete(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap();

    assert_eq!(h.fake.count("DELETE", VDOM), 0);
    assert_eq!(h.fake.vdoms(), vec![TENANT.to_owned()]);
    assert_eq!(h.ports.addresses(VIP_PORT), vec!["10.0.0.11".to_owned()]);

    h.orch
        .execute(Request::delete(EntityKind::LoadBalancer, "lb2"))
        .await
        .unwrap();

    assert_eq!(h.fake.count("DELETE", VDOM), 1);
    assert!(h.fake.vdoms().is_empty());
    assert!(h.ports.addresses(VIP_PORT).is_empty());
}

#[tokio::test]
async fn test_multi_tenancy_enabled_once_per_device() {
    let h = Harness::start().await;
    create(&h, "lb1", "10.0.0.10").await;
    create(&h, "lb2", "10.0.0.11").await;

    assert_eq!(h.fake.count("GET", common::GLOBAL), 1);
    assert_eq!(h.fake.count("PUT", common::GLOBAL), 1);
    assert_eq!(h.fake.version_checks(), 1);
}

#[tokio::test]
async fn test_old_firmware_is_refused_before_any_change() {
    let h = Harness::start().await;
    h.fake.set_firmware("4.8-2");
    h.state.put_load_balancer(lb("lb1", TENANT, "10.0.0.10"));

    let err = h
        .orch
        .execute(Request::create(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Unsupported { .. }));
    assert_eq!(h.fake.count("PUT", common::GLOBAL), 0);
    assert!(h.fake.vdoms().is_empty());
    assert_eq!(
        h.status(EntityKind::LoadBalancer, "lb1"),
        Some(ProvisioningStatus::Error)
    );
}

#[tokio::test]
async fn test_teardown_tolerates_absent_listings() {
    let h = Harness::start().await;
    create(&h, "lb1", "10.0.0.10").await;
    h.fake.absent_listing(NAT_POOL);
    h.fake.absent_listing(ROUTE);

    h.orch
        .execute(Request::delete(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap();

    assert_eq!(h.fake.count("DELETE", NAT_POOL), 0);
    assert_eq!(h.fake.count("DELETE", ROUTE), 0);
    assert!(h.fake.vdoms().is_empty());
    assert_eq!(h.status(EntityKind::LoadBalancer, "lb1"), None);
}

#[tokio::test]
async fn test_teardown_of_vanished_scope_succeeds() {
    let h = Harness::start().await;
    create(&h, "lb1", "10.0.0.10").await;
    assert!(h.fake.remove(VDOM, "", "", TENANT));
    h.fake.clear_calls();

    h.orch
        .execute(Request::delete(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap();

    assert_eq!(h.fake.count("DELETE", VDOM), 0);
    assert_eq!(h.fake.count("DELETE", ROUTE), 0);
    assert_eq!(h.fake.count("PUT", INTF), 0);
    assert!(h.ports.addresses(VIP_PORT).is_empty());
    assert_eq!(h.status(EntityKind::LoadBalancer, "lb1"), None);
}

#[tokio::test]
async fn test_unplug_removes_every_duplicate_vip() {
    let h = Harness::start().await;
    h.ports.seed(
        VIP_PORT,
        vec!["10.0.0.10".into(), "10.9.9.9".into(), "10.0.0.10".into()],
    );
    create(&h, "lb1", "10.0.0.10").await;
    assert_eq!(h.ports.addresses(VIP_PORT).len(), 3);

    h.orch
        .execute(Request::delete(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap();

    assert_eq!(h.ports.addresses(VIP_PORT), vec!["10.9.9.9".to_owned()]);
}

#[tokio::test]
async fn test_failed_route_leaves_load_balancer_in_error() {
    let h = Harness::start().await;
    h.fake.fail("POST", ROUTE, -97);
    h.state.put_load_balancer(lb("lb1", TENANT, "10.0.0.10"));

    let err = h
        .orch
        .execute(Request::create(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::DeviceBusiness { code: -97, .. }));
    assert_eq!(
        h.status(EntityKind::LoadBalancer, "lb1"),
        Some(ProvisioningStatus::Error)
    );
    // The VIP step never ran.
    assert!(h.ports.addresses(VIP_PORT).is_empty());
}
