//! Demo resources seeded into the in-memory cloud.

use cloudsync_testing::InMemoryCloud;
use nebucloud_cloudsync::core::remote::{
    RemoteImage, RemoteInstance, RemoteInstanceType, RemoteKeyPair, RemoteListener,
    RemoteLoadBalancer, RemoteNetwork, RemoteSecurityGroup, RemoteServerGroup, RemoteSubnet,
};
use nebucloud_cloudsync::prelude::{Scope, Target};

const APPLICATIONS: [&str; 3] = ["web", "api", "worker"];

/// Seed `groups` server groups per application plus their supporting
/// network, image and load balancer resources.
pub fn seed(cloud: &InMemoryCloud, scope: &Scope, groups: usize) {
    let zone = format!("{}-1", scope.region);
    let vpc = format!("vpc-{}", scope.region);
    let subnet = format!("subnet-{}", scope.region);

    cloud.add_network(
        scope,
        RemoteNetwork {
            id: vpc.clone(),
            name: "default".into(),
            cidr_block: "10.0.0.0/16".into(),
            is_default: true,
        },
    );
    cloud.add_subnet(
        scope,
        RemoteSubnet {
            id: subnet.clone(),
            name: "default-a".into(),
            network_id: vpc.clone(),
            cidr_block: "10.0.1.0/24".into(),
            zone: zone.clone(),
        },
    );
    cloud.add_image(
        scope,
        RemoteImage {
            id: "img-base".into(),
            name: "base-ubuntu".into(),
            os_name: "Ubuntu 22.04".into(),
            image_type: "PRIVATE_IMAGE".into(),
            state: "NORMAL".into(),
            ..RemoteImage::default()
        },
    );
    cloud.add_key_pair(
        scope,
        RemoteKeyPair {
            id: "kp-ops".into(),
            name: "ops".into(),
            fingerprint: None,
        },
    );
    cloud.add_instance_type(
        scope,
        RemoteInstanceType {
            name: "S2.SMALL1".into(),
            zone: zone.clone(),
            family: "S2".into(),
            cpu: 1,
            memory_mib: 1024,
        },
    );

    for app in APPLICATIONS {
        cloud.add_security_group(
            scope,
            RemoteSecurityGroup {
                id: format!("sg-{app}"),
                name: format!("{app}-ingress"),
                ..RemoteSecurityGroup::default()
            },
        );

        let lb_id = format!("lb-{app}");
        let mut targets = Vec::new();
        for g in 0..groups {
            let name = format!("{app}-prod-v{g:03}");
            let instance_ids: Vec<String> = (0..2).map(|i| format!("ins-{app}-{g}-{i}")).collect();
            for (i, id) in instance_ids.iter().enumerate() {
                cloud.add_instance(
                    scope,
                    RemoteInstance {
                        id: id.clone(),
                        name: id.clone(),
                        state: "RUNNING".into(),
                        zone: zone.clone(),
                        image_id: Some("img-base".into()),
                        instance_type: Some("S2.SMALL1".into()),
                        private_ips: vec![format!("10.0.{g}.{}", i + 10)],
                        network_id: Some(vpc.clone()),
                        subnet_id: Some(subnet.clone()),
                        security_group_ids: vec![format!("sg-{app}")],
                        server_group_name: Some(name.clone()),
                        ..RemoteInstance::default()
                    },
                );
                targets.push(Target::new(id.clone(), 8080));
            }
            cloud.add_server_group(
                scope,
                RemoteServerGroup {
                    id: format!("asg-{app}-{g}"),
                    name,
                    status: "NORMAL".into(),
                    min_size: 1,
                    max_size: 4,
                    desired_size: 2,
                    network_id: Some(vpc.clone()),
                    subnet_ids: vec![subnet.clone()],
                    zones: vec![zone.clone()],
                    load_balancer_ids: vec![lb_id.clone()],
                    instance_ids,
                    ..RemoteServerGroup::default()
                },
            );
        }

        cloud.add_load_balancer(
            scope,
            RemoteLoadBalancer {
                id: lb_id.clone(),
                name: format!("{app}-frontend"),
                kind: "OPEN".into(),
                network_id: Some(vpc.clone()),
                subnet_id: Some(subnet.clone()),
                listeners: vec![RemoteListener {
                    listener_id: format!("lbl-{app}"),
                    protocol: "TCP".into(),
                    port: 80,
                    targets,
                    ..RemoteListener::default()
                }],
                ..RemoteLoadBalancer::default()
            },
        );
    }
}
