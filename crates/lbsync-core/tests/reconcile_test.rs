#![allow(clippy::unwrap_used)]
// Single-flight, revert on device failure, and the supervising sweep.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;

use common::{
    HC, Harness, MEMBER, POOL, RS, TENANT, VDOM, VIP_PORT, VS, lb, listener, member, monitor, pool,
};
use lbsync_api::VsStats;
use lbsync_core::{CoreError, EntityId, EntityKind, ProvisioningStatus, Request, StateStore, SweepReport};

/// LB with one listener served by one pool with one member.
async fn build_tree(h: &Harness) {
    h.state.put_load_balancer(lb("lb1", TENANT, "10.0.0.10"));
    h.orch
        .execute(Request::create(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap();

    h.state.put_listener(listener("l1", "lb1", 80, Some("p1")));
    h.state.put_pool(pool("p1", "lb1", Some("l1")));
    h.orch
        .execute(Request::create(EntityKind::Pool, "p1"))
        .await
        .unwrap();

    h.state.put_member(member("m1", "p1", "10.0.1.1", 8080));
    h.orch
        .execute(Request::create(EntityKind::Member, "m1"))
        .await
        .unwrap();
}

// ── Single flight ───────────────────────────────────────────────────

#[tokio::test]
async fn test_second_request_for_same_entity_is_busy() {
    let h = Harness::start().await;
    h.state.put_load_balancer(lb("lb1", TENANT, "10.0.0.10"));
    h.fake.set_delay(Duration::from_millis(300));

    let first = h.orch.submit(Request::create(EntityKind::LoadBalancer, "lb1"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.orch.in_flight(), 1);
    let err = h
        .orch
        .execute(Request::update(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Busy { .. }));

    first.await.unwrap().unwrap();
    assert_eq!(h.orch.in_flight(), 0);
    assert_eq!(
        h.status(EntityKind::LoadBalancer, "lb1"),
        Some(ProvisioningStatus::Active)
    );
}

#[tokio::test]
async fn test_cascade_delete_holds_every_descendant() {
    let h = Harness::start().await;
    build_tree(&h).await;
    h.fake.set_delay(Duration::from_millis(300));

    let delete = h.orch.submit(Request::delete(EntityKind::LoadBalancer, "lb1"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    // The load balancer, its listener, pool and member.
    assert_eq!(h.orch.in_flight(), 4);

    for (kind, id) in [(EntityKind::Pool, "p1"), (EntityKind::Member, "m1")] {
        let err = h.orch.execute(Request::update(kind, id)).await.unwrap_err();
        assert!(matches!(err, CoreError::Busy { .. }), "{kind} {id}: {err}");
    }

    delete.await.unwrap().unwrap();
    assert_eq!(h.orch.in_flight(), 0);
    assert_eq!(h.status(EntityKind::Pool, "p1"), None);
}

#[tokio::test]
async fn test_same_id_across_kinds_is_not_busy() {
    let h = Harness::start().await;
    h.state.put_load_balancer(lb("x1", TENANT, "10.0.0.10"));
    h.fake.set_delay(Duration::from_millis(200));

    let first = h.orch.submit(Request::create(EntityKind::LoadBalancer, "x1"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Fails on lookup, not on the single-flight slot.
    let err = h
        .orch
        .execute(Request::create(EntityKind::Pool, "x1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotYetCommitted { .. }));

    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_sweep_skips_entity_with_flow_in_progress() {
    let h = Harness::start().await;
    h.state.put_load_balancer(lb("lb1", TENANT, "10.0.0.10"));
    h.orch
        .execute(Request::create(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap();
    h.fake.set_delay(Duration::from_millis(300));

    let delete = h.orch.submit(Request::delete(EntityKind::LoadBalancer, "lb1"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.status(EntityKind::LoadBalancer, "lb1"),
        Some(ProvisioningStatus::PendingDelete)
    );

    let report = h.orch.reconcile_sweep().await.unwrap();
    assert_eq!(report, SweepReport::default());

    delete.await.unwrap().unwrap();
    assert_eq!(h.fake.count("DELETE", VDOM), 1);
}

// ── Revert ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_virtual_server_reverts_pool() {
    let h = Harness::start().await;
    h.state.put_load_balancer(lb("lb1", TENANT, "10.0.0.10"));
    h.orch
        .execute(Request::create(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap();
    h.state.put_listener(listener("l1", "lb1", 80, Some("p1")));
    h.state.put_pool(pool("p1", "lb1", Some("l1")));
    h.fake.fail("POST", VS, -97);

    let err = h
        .orch
        .execute(Request::create(EntityKind::Pool, "p1"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::DeviceBusiness { code: -97, .. }));
    assert_eq!(h.fake.count("POST", POOL), 1);
    assert_eq!(h.fake.count("DELETE", POOL), 1);
    assert!(h.fake.objects(POOL, TENANT, "").is_empty());
    assert_eq!(h.status(EntityKind::Pool, "p1"), Some(ProvisioningStatus::Error));
    assert_eq!(
        h.status(EntityKind::Listener, "l1"),
        Some(ProvisioningStatus::PendingCreate)
    );
    assert_eq!(
        h.status(EntityKind::LoadBalancer, "lb1"),
        Some(ProvisioningStatus::Active)
    );
}

#[tokio::test]
async fn test_failed_membership_marks_member_error() {
    let h = Harness::start().await;
    build_tree(&h).await;
    h.fake.fail("POST", MEMBER, -97);

    h.state.put_member(member("m2", "p1", "10.0.1.2", 8080));
    let err = h
        .orch
        .execute(Request::create(EntityKind::Member, "m2"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::DeviceBusiness { code: -97, .. }));
    assert_eq!(h.status(EntityKind::Member, "m2"), Some(ProvisioningStatus::Error));
    assert_eq!(h.status(EntityKind::Member, "m1"), Some(ProvisioningStatus::Active));
    assert_eq!(h.fake.objects(MEMBER, TENANT, "p1").len(), 1);
    assert!(h.fake.object(RS, TENANT, "", "m1").is_some());
}

#[tokio::test]
async fn test_failed_redeploy_removes_earlier_writes_newest_first() {
    let h = Harness::start().await;
    build_tree(&h).await;
    h.state.put_member(member("m2", "p1", "10.0.1.2", 8080));
    h.orch
        .execute(Request::create(EntityKind::Member, "m2"))
        .await
        .unwrap();
    let mut p1 = pool("p1", "lb1", Some("l1"));
    p1.health_monitor_id = Some("hm1".into());
    p1.provisioning_status = ProvisioningStatus::Active;
    h.state.put_pool(p1);
    h.state.put_health_monitor(monitor("hm1", "p1"));
    h.orch
        .execute(Request::create(EntityKind::HealthMonitor, "hm1"))
        .await
        .unwrap();

    assert!(h.fake.remove(VS, TENANT, "", "l1"));
    h.fake.fail("POST", HC, -97);
    h.fake.clear_calls();

    let report = h.orch.reconcile_sweep().await.unwrap();
    assert_eq!(report.failures, 1);

    let deletes: Vec<(String, Option<String>)> = h
        .fake
        .calls()
        .into_iter()
        .filter(|c| c.method == "DELETE")
        .map(|c| {
            let key = if c.resource == MEMBER { None } else { c.mkey };
            (c.resource, key)
        })
        .collect();
    let expected: Vec<(String, Option<String>)> = vec![
        (MEMBER.into(), None),
        (RS.into(), Some("m2".into())),
        (MEMBER.into(), None),
        (RS.into(), Some("m1".into())),
        (VS.into(), Some("l1".into())),
        (POOL.into(), Some("p1".into())),
    ];
    assert_eq!(deletes, expected);

    // The failing write and the shared scope are left alone.
    assert_eq!(h.fake.count("DELETE", HC), 0);
    assert_eq!(h.fake.vdoms(), vec![TENANT.to_owned()]);
    assert_eq!(h.ports.addresses(VIP_PORT), vec!["10.0.0.10".to_owned()]);
    assert_eq!(
        h.status(EntityKind::LoadBalancer, "lb1"),
        Some(ProvisioningStatus::Error)
    );
}

#[tokio::test]
async fn test_missing_entity_is_not_yet_committed() {
    let h = Harness::start().await;

    let err = h
        .orch
        .execute(Request::create(EntityKind::Member, "ghost"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::NotYetCommitted { .. }));
    assert!(h.fake.calls().is_empty());
    assert_eq!(h.orch.in_flight(), 0);
}

// ── Sweep ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sweep_redeploys_missing_virtual_server() {
    let h = Harness::start().await;
    build_tree(&h).await;

    let report = h.orch.reconcile_sweep().await.unwrap();
    assert_eq!(report.probed, 1);
    assert_eq!(report.redeployed, 0);

    assert!(h.fake.remove(VS, TENANT, "", "l1"));
    let report = h.orch.reconcile_sweep().await.unwrap();
    assert_eq!(report.redeployed, 1);
    assert_eq!(report.failures, 0);

    let vs = h.fake.object(VS, TENANT, "", "l1").unwrap();
    assert_eq!(vs["pool"], "p1");
    // Existing objects converge without duplicates.
    assert_eq!(h.fake.objects(POOL, TENANT, "").len(), 1);
    assert_eq!(h.fake.objects(MEMBER, TENANT, "p1").len(), 1);
    assert_eq!(
        h.status(EntityKind::LoadBalancer, "lb1"),
        Some(ProvisioningStatus::Active)
    );

    let report = h.orch.reconcile_sweep().await.unwrap();
    assert_eq!(report.redeployed, 0);
}

#[tokio::test]
async fn test_sweep_redrives_pending_delete() {
    let h = Harness::start().await;
    h.state.put_load_balancer(lb("lb1", TENANT, "10.0.0.10"));
    h.orch
        .execute(Request::create(EntityKind::LoadBalancer, "lb1"))
        .await
        .unwrap();
    h.state
        .set_status(
            EntityKind::LoadBalancer,
            &EntityId::from("lb1"),
            Some(ProvisioningStatus::PendingDelete),
            None,
        )
        .await
        .unwrap();

    let report = h.orch.reconcile_sweep().await.unwrap();

    assert_eq!(report.deletes_redriven, 1);
    assert_eq!(report.probed, 0);
    assert!(h.fake.vdoms().is_empty());
    assert_eq!(h.status(EntityKind::LoadBalancer, "lb1"), None);
}

#[tokio::test]
async fn test_stats_sum_every_virtual_server() {
    let h = Harness::start().await;
    build_tree(&h).await;
    // A listener without a virtual server contributes nothing.
    h.state.put_listener(listener("l2", "lb1", 81, None));

    let recorded = h.orch.collect_stats().await.unwrap();

    assert_eq!(recorded, 1);
    assert_eq!(
        h.state.stats(&EntityId::from("lb1")),
        Some(VsStats {
            bytes_in: 150,
            bytes_out: 200,
            active_connections: 3,
            total_connections: 8,
        })
    );
}

#[tokio::test]
async fn test_warm_cache_maps_every_tenant() {
    let h = Harness::start().await;
    h.state.put_load_balancer(lb("lb1", TENANT, "10.0.0.10"));
    h.state.put_load_balancer(lb("lb2", "t2", "10.0.0.20"));
    h.state.put_load_balancer(lb("lb3", "unmapped", "10.0.0.30"));

    assert_eq!(h.orch.warm_cache().await.unwrap(), 2);
    assert!(h.orch.driver_for("unmapped").is_err());
}
