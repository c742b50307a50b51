//! Scan, on-demand and reconcile cycles across crates.

use std::sync::Arc;

use cloudsync_testing::InMemoryCloud;
use nebucloud_cloudsync::core::remote::{RemoteLoadBalancer, RemoteServerGroup};
use nebucloud_cloudsync::prelude::*;

const SVG_KEY: &str = "svg:prod:r1:web-prod-v001";
const LB_KEY: &str = "lb:prod:r1:lb-1";

fn scope() -> Scope {
    Scope::new("prod", "r1")
}

fn server_group() -> RemoteServerGroup {
    RemoteServerGroup {
        id: "asg-1".into(),
        name: "web-prod-v001".into(),
        status: "NORMAL".into(),
        desired_size: 2,
        max_size: 4,
        load_balancer_ids: vec!["lb-1".into()],
        ..RemoteServerGroup::default()
    }
}

fn load_balancer() -> RemoteLoadBalancer {
    RemoteLoadBalancer {
        id: "lb-1".into(),
        name: "web-frontend".into(),
        kind: "OPEN".into(),
        ..RemoteLoadBalancer::default()
    }
}

fn setup() -> (Arc<InMemoryCloud>, Arc<ManualClock>, Arc<ProviderCache>, Pipeline) {
    let cloud = Arc::new(InMemoryCloud::new());
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
    let cache = Arc::new(ProviderCache::new());
    let pipeline =
        Pipeline::new(scope(), cache.clone(), cloud.clone()).with_clock(clock.clone());
    (cloud, clock, cache, pipeline)
}

#[tokio::test]
async fn full_scan_populates_every_namespace() {
    let (cloud, _clock, cache, pipeline) = setup();
    cloud.add_server_group(&scope(), server_group());
    cloud.add_load_balancer(&scope(), load_balancer());

    let report = pipeline.run_cycle().await;

    assert_eq!(report.failures(), 0);
    assert!(cache.contains(Namespace::ServerGroups, SVG_KEY));
    assert!(cache.contains(Namespace::LoadBalancers, LB_KEY));
    assert!(cache.contains(Namespace::Applications, "app:web"));

    let balancers = cache.related(Namespace::ServerGroups, SVG_KEY, Namespace::LoadBalancers);
    assert_eq!(balancers.len(), 1);
    assert_eq!(balancers[0].key(), LB_KEY);
}

#[tokio::test]
async fn refreshed_server_group_is_visible_until_the_scan_catches_up() {
    let (cloud, clock, cache, pipeline) = setup();
    pipeline.run_cycle().await;
    assert!(!cache.contains(Namespace::ServerGroups, SVG_KEY));

    // Created remotely and refreshed, but the list endpoint still lags.
    cloud.add_server_group(&scope(), server_group());
    clock.set(Timestamp::from_millis(100));
    let stored = pipeline
        .handle_on_demand(&OnDemandRequest::new(
            OnDemandKind::ServerGroup,
            "prod",
            "r1",
            "web-prod-v001",
        ))
        .await
        .unwrap()
        .expect("server group refresh is handled");
    assert_eq!(stored.key, SVG_KEY);
    assert!(!cache.contains(Namespace::ServerGroups, SVG_KEY));
    cloud.remove_server_group(&scope(), "web-prod-v001");

    // Scan started before the refresh: merged.
    clock.set(Timestamp::from_millis(90));
    pipeline.run_cycle().await;
    assert!(cache.contains(Namespace::ServerGroups, SVG_KEY));
    assert_eq!(cache.on_demand().get(SVG_KEY).unwrap().processed_count, 1);

    // Scan started after the refresh and it was already processed: evicted.
    clock.set(Timestamp::from_millis(150));
    pipeline.run_cycle().await;
    assert!(!cache.contains(Namespace::ServerGroups, SVG_KEY));
    assert!(cache.on_demand().is_empty());
}

#[tokio::test]
async fn refresh_of_deleted_resource_removes_it_on_next_cycle() {
    let (cloud, clock, cache, pipeline) = setup();
    cloud.add_load_balancer(&scope(), load_balancer());
    pipeline.run_cycle().await;
    assert!(cache.contains(Namespace::LoadBalancers, LB_KEY));

    cloud.remove_load_balancer(&scope(), "lb-1");
    clock.set(Timestamp::from_millis(100));
    pipeline.handle_on_demand_key(LB_KEY).await.unwrap();
    // A stale list still reports it.
    cloud.add_load_balancer(&scope(), load_balancer());

    clock.set(Timestamp::from_millis(90));
    pipeline.run_cycle().await;

    assert!(!cache.contains(Namespace::LoadBalancers, LB_KEY));
}

#[tokio::test]
async fn pending_requests_reflect_outstanding_refreshes() {
    let (cloud, clock, _cache, pipeline) = setup();
    cloud.add_load_balancer(&scope(), load_balancer());

    clock.set(Timestamp::from_millis(1_000));
    pipeline.handle_on_demand_key(LB_KEY).await.unwrap();
    clock.set(Timestamp::from_millis(4_000));

    let pending = pipeline.pending_on_demand_requests();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, LB_KEY);
}

#[tokio::test]
async fn failed_scan_keeps_previous_cycle() {
    let (cloud, _clock, cache, pipeline) = setup();
    cloud.add_server_group(&scope(), server_group());
    pipeline.run_cycle().await;

    cloud.fail_lists(true);
    let report = pipeline.run_cycle().await;

    assert_eq!(report.failures(), pipeline.agent_types().len());
    assert!(cache.contains(Namespace::ServerGroups, SVG_KEY));
}

#[tokio::test]
async fn scopes_are_isolated() {
    let cloud = Arc::new(InMemoryCloud::new());
    let east = Scope::new("prod", "east");
    let west = Scope::new("prod", "west");
    cloud.add_load_balancer(&east, load_balancer());

    let east_cache = Arc::new(ProviderCache::new());
    let west_cache = Arc::new(ProviderCache::new());
    let east_pipeline = Pipeline::new(east, east_cache.clone(), cloud.clone());
    let west_pipeline = Pipeline::new(west, west_cache.clone(), cloud.clone());

    let (east_report, west_report) =
        tokio::join!(east_pipeline.run_cycle(), west_pipeline.run_cycle());

    assert_eq!(east_report.failures() + west_report.failures(), 0);
    assert!(east_cache.contains(Namespace::LoadBalancers, "lb:prod:east:lb-1"));
    assert!(west_cache.get_all(Namespace::LoadBalancers).is_empty());
}

#[tokio::test]
async fn refresh_for_another_scope_is_not_handled() {
    let (cloud, _clock, cache, pipeline) = setup();
    cloud.add_load_balancer(&Scope::new("prod", "r2"), load_balancer());

    let handled = pipeline
        .handle_on_demand_key("lb:prod:r2:lb-1")
        .await
        .unwrap();

    assert!(handled.is_none());
    assert!(cache.on_demand().is_empty());
}
