//! Load tests for the cache and pipelines.
//!
//! These tests verify the system holds up under concurrent use:
//! - Many scopes scanning in parallel
//! - Readers running while namespaces are reinstalled
//! - Many on-demand refreshes racing full scans
//!
//! Run with: `cargo test --package cloudsync-integration-tests --test load_tests -- --nocapture`

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cloudsync_testing::InMemoryCloud;
use nebucloud_cloudsync::core::remote::{RemoteInstance, RemoteServerGroup};
use nebucloud_cloudsync::prelude::*;
use tokio::sync::Barrier;

fn seed_scope(cloud: &InMemoryCloud, scope: &Scope, groups: usize) {
    for g in 0..groups {
        let name = format!("app{}-prod-v{:03}", g % 10, g);
        let instance_ids: Vec<String> = (0..4).map(|i| format!("ins-{g}-{i}")).collect();
        for id in &instance_ids {
            cloud.add_instance(
                scope,
                RemoteInstance {
                    id: id.clone(),
                    name: id.clone(),
                    state: "RUNNING".into(),
                    zone: format!("{}-1", scope.region),
                    server_group_name: Some(name.clone()),
                    ..RemoteInstance::default()
                },
            );
        }
        cloud.add_server_group(
            scope,
            RemoteServerGroup {
                id: format!("asg-{g}"),
                name,
                status: "NORMAL".into(),
                desired_size: 4,
                max_size: 4,
                instance_ids,
                ..RemoteServerGroup::default()
            },
        );
    }
}

/// Every region of an account scanning at once.
#[tokio::test]
async fn test_parallel_scopes() {
    let cloud = Arc::new(InMemoryCloud::new());
    let config = SyncConfig::new().account("prod", (0..16).map(|r| format!("region{r}")));
    for scope in config.scopes() {
        seed_scope(&cloud, &scope, 50);
    }

    let pipelines: Vec<(Arc<ProviderCache>, Arc<Pipeline>)> = config
        .scopes()
        .into_iter()
        .map(|scope| {
            let cache = Arc::new(ProviderCache::new());
            let pipeline = Arc::new(Pipeline::new(scope, cache.clone(), cloud.clone()));
            (cache, pipeline)
        })
        .collect();

    let start = Instant::now();
    let handles: Vec<_> = pipelines
        .iter()
        .map(|(_, pipeline)| {
            let pipeline = Arc::clone(pipeline);
            tokio::spawn(async move { pipeline.run_cycle().await })
        })
        .collect();
    for handle in handles {
        let report = handle.await.expect("pipeline task panicked");
        assert_eq!(report.failures(), 0);
    }
    println!("16 scopes scanned in {:?}", start.elapsed());

    for (cache, pipeline) in &pipelines {
        assert_eq!(cache.keys(Namespace::ServerGroups).len(), 50);
        assert_eq!(cache.keys(Namespace::Instances).len(), 200);
        let region = &pipeline.scope().region;
        assert!(cache
            .keys(Namespace::Instances)
            .iter()
            .all(|k| k.contains(region.as_str())));
    }
}

/// Readers never observe a half-installed namespace.
#[tokio::test]
async fn test_concurrent_readers_writers() {
    let cache = Arc::new(ProviderCache::new());
    let num_readers = 8;
    let num_writers = 2;
    let ops_per_task = 500;
    let entities_per_install = 100;

    let install = move |cache: &ProviderCache, generation: usize| {
        let entities: BTreeMap<String, EntitySnapshot> = (0..entities_per_install)
            .map(|i| {
                let key = format!("app:gen{generation}x{i}");
                (key.clone(), EntitySnapshot::placeholder(key))
            })
            .collect();
        cache.install(Namespace::Applications, entities);
    };
    install(&cache, 0);

    let barrier = Arc::new(Barrier::new(num_readers + num_writers));
    let read_count = Arc::new(AtomicU64::new(0));
    let write_count = Arc::new(AtomicU64::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..num_readers {
        let cache = Arc::clone(&cache);
        let barrier = Arc::clone(&barrier);
        let read_count = Arc::clone(&read_count);

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for _ in 0..ops_per_task {
                let all = cache.get_all(Namespace::Applications);
                assert_eq!(all.len(), entities_per_install);
                let generation = all[0].key().split('x').next().map(str::to_string);
                assert!(all
                    .iter()
                    .all(|e| e.key().split('x').next().map(str::to_string) == generation));
                read_count.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        }));
    }

    for writer_id in 0..num_writers {
        let cache = Arc::clone(&cache);
        let barrier = Arc::clone(&barrier);
        let write_count = Arc::clone(&write_count);

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for i in 0..ops_per_task {
                install(&cache, 1 + writer_id * ops_per_task + i);
                write_count.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        }));
    }

    for handle in handles {
        handle.await.expect("Task panicked");
    }

    let duration = start.elapsed();
    let total_reads = read_count.load(Ordering::Relaxed);
    let total_writes = write_count.load(Ordering::Relaxed);
    println!(
        "Concurrent R/W: {} reads, {} installs in {:?}",
        total_reads, total_writes, duration
    );
    assert_eq!(total_reads, (num_readers * ops_per_task) as u64);
    assert_eq!(total_writes, (num_writers * ops_per_task) as u64);
}

/// Refreshes racing scans never lose a refresh nor keep one past its time.
#[tokio::test]
async fn test_refreshes_racing_scans() {
    let scope = Scope::new("prod", "region1");
    let cloud = Arc::new(InMemoryCloud::new());
    seed_scope(&cloud, &scope, 20);
    let cache = Arc::new(ProviderCache::new());
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(100)));
    let pipeline = Arc::new(
        Pipeline::new(scope.clone(), cache.clone(), cloud.clone()).with_clock(clock.clone()),
    );

    let refresher = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            for g in 0..20 {
                let request = OnDemandRequest::new(
                    OnDemandKind::ServerGroup,
                    "prod",
                    "region1",
                    format!("app{}-prod-v{:03}", g % 10, g),
                );
                pipeline
                    .handle_on_demand(&request)
                    .await
                    .expect("refresh succeeds")
                    .expect("refresh is handled");
                tokio::task::yield_now().await;
            }
        })
    };
    let scanner = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            for _ in 0..5 {
                pipeline.run_cycle().await;
                tokio::task::yield_now().await;
            }
        })
    };
    refresher.await.expect("refresher panicked");
    scanner.await.expect("scanner panicked");

    // Each refresh survives at most one more pass once it is older than the scan.
    clock.set(Timestamp::from_millis(200));
    pipeline.run_cycle().await;
    clock.set(Timestamp::from_millis(300));
    pipeline.run_cycle().await;

    assert!(cache.on_demand().is_empty());
    assert_eq!(cache.keys(Namespace::ServerGroups).len(), 20);
    assert_eq!(
        cache.stats().on_demand_stored(),
        cache.stats().on_demand_evicted()
    );
}
