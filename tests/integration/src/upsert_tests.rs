//! Upsert, refresh and reconcile across crates.

use std::sync::Arc;
use std::time::Duration;

use cloudsync_testing::InMemoryCloud;
use nebucloud_cloudsync::core::remote::{RemoteListener, RemoteLoadBalancer};
use nebucloud_cloudsync::core::{keys, Attributes, HealthCheck};
use nebucloud_cloudsync::lb::StepOutcome;
use nebucloud_cloudsync::prelude::*;

fn scope() -> Scope {
    Scope::new("prod", "r1")
}

struct Harness {
    cloud: Arc<InMemoryCloud>,
    clock: Arc<ManualClock>,
    cache: Arc<ProviderCache>,
    pipeline: Arc<Pipeline>,
    upserter: LoadBalancerUpserter,
}

fn harness() -> Harness {
    let cloud = Arc::new(InMemoryCloud::new());
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
    let cache = Arc::new(ProviderCache::new());
    let pipeline = Arc::new(
        Pipeline::new(scope(), cache.clone(), cloud.clone()).with_clock(clock.clone()),
    );
    let upserter = LoadBalancerUpserter::new(cloud.clone(), cloud.clone())
        .with_poller(TaskPoller::new(Duration::ZERO, 5))
        .with_trigger(pipeline.clone());
    Harness {
        cloud,
        clock,
        cache,
        pipeline,
        upserter,
    }
}

fn cached_listeners(cache: &ProviderCache, key: &str) -> Vec<Listener> {
    let entity = cache
        .get(Namespace::LoadBalancers, key)
        .expect("load balancer is cached");
    match entity.attributes() {
        Attributes::LoadBalancer(attrs) => attrs.listeners.clone(),
        other => panic!("unexpected attributes {other:?}"),
    }
}

#[tokio::test]
async fn created_load_balancer_is_visible_before_the_scan_sees_it() {
    let h = harness();
    h.pipeline.run_cycle().await;

    h.clock.set(Timestamp::from_millis(100));
    let request = UpsertLoadBalancerRequest::new("prod", "r1", "web-frontend")
        .listener(Listener::layer4(L4Protocol::Tcp, 80).with_target(Target::new("ins-1", 80)));
    let log = TaskLog::new();
    let outcome = h.upserter.upsert(&request, &log).await.unwrap();

    assert!(outcome.created);
    assert!(outcome.is_success());
    assert!(outcome.refreshed);
    let key = keys::load_balancer("prod", "r1", &outcome.load_balancer_id).unwrap();
    assert!(h.cache.on_demand().get(&key).is_some());
    assert!(!h.cache.contains(Namespace::LoadBalancers, &key));

    // The list endpoint has not caught up.
    h.cloud.remove_load_balancer(&scope(), &outcome.load_balancer_id);

    h.clock.set(Timestamp::from_millis(90));
    h.pipeline.run_cycle().await;
    let listeners = cached_listeners(&h.cache, &key);
    assert_eq!(listeners.len(), 1);
    assert_eq!(listeners[0].targets(), &[Target::new("ins-1", 80)]);

    h.clock.set(Timestamp::from_millis(150));
    h.pipeline.run_cycle().await;
    assert!(!h.cache.contains(Namespace::LoadBalancers, &key));
    assert!(h.cache.on_demand().is_empty());
}

#[tokio::test]
async fn scan_and_refresh_agree_once_the_list_catches_up() {
    let h = harness();

    h.clock.set(Timestamp::from_millis(100));
    let request = UpsertLoadBalancerRequest::new("prod", "r1", "web-frontend")
        .listener(Listener::layer4(L4Protocol::Tcp, 80));
    let outcome = h.upserter.upsert(&request, &NullSink).await.unwrap();
    let key = keys::load_balancer("prod", "r1", &outcome.load_balancer_id).unwrap();

    h.clock.set(Timestamp::from_millis(200));
    h.pipeline.run_cycle().await;
    h.clock.set(Timestamp::from_millis(300));
    h.pipeline.run_cycle().await;

    assert!(h.cache.contains(Namespace::LoadBalancers, &key));
    assert!(h.cache.on_demand().is_empty());
    assert_eq!(h.cache.stats().on_demand_evicted(), 1);
}

#[tokio::test]
async fn listener_changes_show_up_after_refresh() {
    let h = harness();
    h.cloud.add_load_balancer(
        &scope(),
        RemoteLoadBalancer {
            id: "lb-7".into(),
            name: "web-frontend".into(),
            kind: "OPEN".into(),
            listeners: vec![
                RemoteListener {
                    listener_id: "lbl-a".into(),
                    protocol: "TCP".into(),
                    port: 80,
                    ..RemoteListener::default()
                },
                RemoteListener {
                    listener_id: "lbl-b".into(),
                    protocol: "UDP".into(),
                    port: 53,
                    ..RemoteListener::default()
                },
            ],
            ..RemoteLoadBalancer::default()
        },
    );
    h.pipeline.run_cycle().await;
    let key = "lb:prod:r1:lb-7";
    assert_eq!(cached_listeners(&h.cache, key).len(), 2);

    // Keep the TCP listener with a health check, drop the UDP one.
    h.clock.set(Timestamp::from_millis(100));
    let request = UpsertLoadBalancerRequest::new("prod", "r1", "")
        .with_id("lb-7")
        .listener(
            Listener::layer4(L4Protocol::Tcp, 80)
                .with_id("lbl-a")
                .with_health_check(HealthCheck::enabled()),
        );
    let outcome = h.upserter.upsert(&request, &NullSink).await.unwrap();
    assert_eq!(outcome.submitted(), vec!["deleteListener", "modifyListener"]);

    // The scan that follows started before the refresh.
    h.clock.set(Timestamp::from_millis(50));
    h.pipeline.run_cycle().await;

    let listeners = cached_listeners(&h.cache, key);
    assert_eq!(listeners.len(), 1);
    assert_eq!(listeners[0].health_check(), Some(&HealthCheck::enabled()));
}

#[tokio::test]
async fn partial_failure_still_refreshes() {
    let h = harness();
    h.cloud.fail_mutation("registerTargets", "instance ins-9 is not running");

    let request = UpsertLoadBalancerRequest::new("prod", "r1", "web-frontend")
        .listener(Listener::layer4(L4Protocol::Tcp, 80).with_target(Target::new("ins-9", 80)));
    let log = TaskLog::new();
    let outcome = h.upserter.upsert(&request, &log).await.unwrap();

    assert!(!outcome.is_success());
    assert!(outcome.refreshed);
    let failed: Vec<_> = outcome.problems().map(|s| s.mutation).collect();
    assert_eq!(failed, vec!["registerTargets"]);
    assert!(matches!(outcome.problems().next().unwrap().outcome, StepOutcome::Failed(_)));
    assert!(log.contains("not running"));
}

#[tokio::test]
async fn disabled_on_demand_skips_the_refresh() {
    let cloud = Arc::new(InMemoryCloud::new());
    let cache = Arc::new(ProviderCache::new());
    let pipeline = Arc::new(
        Pipeline::new(scope(), cache.clone(), cloud.clone()).on_demand_enabled(false),
    );
    let upserter = LoadBalancerUpserter::new(cloud.clone(), cloud.clone())
        .with_poller(TaskPoller::new(Duration::ZERO, 5))
        .with_trigger(pipeline);

    let request = UpsertLoadBalancerRequest::new("prod", "r1", "web-frontend");
    let outcome = upserter.upsert(&request, &NullSink).await.unwrap();

    assert!(outcome.created);
    assert!(!outcome.refreshed);
    assert!(cache.on_demand().is_empty());
}
