use super::*;
use crate::server::config::StorageKind;
use crate::server::serve::{Services, plan_endpoints, serve_with_incoming, spawn_on_listener};
use crate::server::service::BatchHandler;
use batchid::{MemoryStorage, SeqKey, StorageError, WatermarkStorage};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio_stream::wrappers::TcpListenerStream;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const MAX_BATCH_GENERATE: u64 = 1_000;

fn tag_dir(steps: &[(&str, u64)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (tag, step) in steps {
        std::fs::write(
            dir.path().join(format!("{tag}.json")),
            format!(r#"{{"step": {step}}}"#),
        )
        .unwrap();
    }
    dir
}

/// A standalone process: memory storage, no hosts.
fn standalone(tags: &Path) -> TopologyConfig {
    TopologyConfig {
        allocator_hosts: Vec::new(),
        storage: Some(StorageKind::Memory),
        tag_config_dir: tags.to_path_buf(),
        requester: None,
        generator_hosts: Vec::new(),
        serve_generator: false,
        preload_tags: Vec::new(),
        max_batch_generate: MAX_BATCH_GENERATE,
        request_timeout: None,
    }
}

async fn reserve_port() -> (HostAddr, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string().parse().unwrap();
    (addr, listener)
}

/// Runs the planned endpoints of several in-process "processes" on
/// pre-bound loopback listeners.
struct Cluster {
    listeners: HashMap<HostAddr, TcpListener>,
    servers: JoinSet<anyhow::Result<()>>,
    shutdown: CancellationToken,
}

impl Cluster {
    async fn with_ports(n: usize) -> (Self, Vec<HostAddr>) {
        let mut listeners = HashMap::new();
        let mut addrs = Vec::new();
        for _ in 0..n {
            let (addr, listener) = reserve_port().await;
            listeners.insert(addr.clone(), listener);
            addrs.push(addr);
        }
        let cluster = Self {
            listeners,
            servers: JoinSet::new(),
            shutdown: CancellationToken::new(),
        };
        (cluster, addrs)
    }

    fn start(&mut self, config: &TopologyConfig) -> Topology {
        let topology = Topology::assemble(config).unwrap();
        for plan in plan_endpoints(&topology) {
            let listener = self
                .listeners
                .remove(&plan.addr)
                .expect("address planned twice or never reserved");
            spawn_on_listener(
                &mut self.servers,
                listener,
                plan.services,
                self.shutdown.clone(),
            );
        }
        topology
    }

    async fn stop(mut self) {
        self.shutdown.cancel();
        while let Some(joined) = self.servers.join_next().await {
            joined.unwrap().unwrap();
        }
    }
}

#[tokio::test]
async fn contradictory_settings_are_rejected() {
    let tags = tag_dir(&[("order", 10)]);
    let host: HostAddr = "127.0.0.1:50051".parse().unwrap();

    let remote_without_hosts = TopologyConfig {
        requester: Some(RequesterKind::Remote),
        ..standalone(tags.path())
    };
    assert!(matches!(
        Topology::assemble(&remote_without_hosts),
        Err(Error::Configuration { .. })
    ));

    let serving_without_hosts = TopologyConfig {
        serve_generator: true,
        ..standalone(tags.path())
    };
    assert!(matches!(
        Topology::assemble(&serving_without_hosts),
        Err(Error::Configuration { .. })
    ));

    let local_without_storage = TopologyConfig {
        storage: None,
        ..standalone(tags.path())
    };
    assert!(matches!(
        Topology::assemble(&local_without_storage),
        Err(Error::Configuration { .. })
    ));

    let explicit_local_without_storage = TopologyConfig {
        storage: None,
        allocator_hosts: vec![host],
        requester: Some(RequesterKind::Local),
        ..standalone(tags.path())
    };
    assert!(matches!(
        Topology::assemble(&explicit_local_without_storage),
        Err(Error::Configuration { .. })
    ));

    let bad_preload = TopologyConfig {
        preload_tags: vec!["order".into(), "no/slashes".into()],
        ..standalone(tags.path())
    };
    assert!(matches!(
        Topology::assemble(&bad_preload),
        Err(Error::InvalidTag { .. })
    ));
}

#[tokio::test]
async fn pure_clients_need_no_allocator() {
    let tags = tag_dir(&[]);
    let config = TopologyConfig {
        storage: None,
        generator_hosts: vec!["127.0.0.1:50052".parse().unwrap()],
        ..standalone(tags.path())
    };
    let topology = Topology::assemble(&config).unwrap();

    assert!(matches!(topology.binding, GeneratorBinding::Remote(_)));
    assert!(topology.allocator_endpoint.is_none());
    assert!(topology.generator_endpoint.is_none());
    assert!(plan_endpoints(&topology).is_empty());
    assert_eq!(topology.describe(), "remote generator");
}

#[tokio::test]
async fn roles_on_one_address_share_a_server() {
    let tags = tag_dir(&[("order", 10)]);
    let host: HostAddr = "127.0.0.1:50053".parse().unwrap();
    let config = TopologyConfig {
        allocator_hosts: vec![host.clone()],
        generator_hosts: vec![host.clone()],
        serve_generator: true,
        ..standalone(tags.path())
    };
    let topology = Topology::assemble(&config).unwrap();
    let plans = plan_endpoints(&topology);

    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].addr, host);
    assert!(plans[0].services.batch.is_some());
    assert!(plans[0].services.id.is_some());
}

#[tokio::test]
async fn local_allocator_and_generator() {
    let tags = tag_dir(&[("order", 10)]);
    let topology = Topology::assemble(&standalone(tags.path())).unwrap();

    assert!(plan_endpoints(&topology).is_empty());
    assert_eq!(topology.describe(), "local generator, local allocator");

    let binding = &topology.binding;
    assert!(!binding.was_loaded("order").await.unwrap());
    assert_eq!(binding.generate("order", 0).await.unwrap(), 1);
    assert!(binding.was_loaded("order").await.unwrap());
    assert_eq!(
        binding.batch_generate("order", 12, 0).await.unwrap(),
        (2..=13).collect::<Vec<_>>()
    );
    assert!(!binding.ensure_loaded("order").await.unwrap());
    assert!(matches!(
        binding.batch_generate("order", MAX_BATCH_GENERATE + 1, 0).await,
        Err(Error::InvalidRequest { .. })
    ));
}

#[tokio::test]
async fn remote_allocator_hands_out_disjoint_batches() {
    let tags = tag_dir(&[("order", 10)]);
    let (mut cluster, addrs) = Cluster::with_ports(1).await;

    // Owns the allocator and reaches it through its own endpoint.
    let owner = cluster.start(&TopologyConfig {
        allocator_hosts: addrs.clone(),
        ..standalone(tags.path())
    });
    // Has no storage at all.
    let client = cluster.start(&TopologyConfig {
        allocator_hosts: addrs.clone(),
        storage: None,
        ..standalone(tags.path())
    });
    assert_eq!(
        owner.describe(),
        format!(
            "local generator, remote allocator; serving allocator on {}",
            addrs[0]
        )
    );

    assert_eq!(owner.binding.generate("order", 0).await.unwrap(), 1);
    assert_eq!(client.binding.generate("order", 0).await.unwrap(), 11);
    assert_eq!(owner.binding.generate("order", 0).await.unwrap(), 2);

    let mut ids = owner.binding.batch_generate("order", 25, 0).await.unwrap();
    ids.extend(client.binding.batch_generate("order", 25, 0).await.unwrap());
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 50);
    assert!(!ids.contains(&1) && !ids.contains(&2) && !ids.contains(&11));

    let allocator = &owner.allocator_endpoint.as_ref().unwrap().service;
    assert_eq!(allocator.watermark("order", &ShardKey::default()).unwrap(), 60);

    cluster.stop().await;
}

#[tokio::test]
async fn remote_generator_shares_one_cache() {
    let tags = tag_dir(&[("order", 10)]);
    let (mut cluster, addrs) = Cluster::with_ports(1).await;

    let owner = cluster.start(&TopologyConfig {
        generator_hosts: addrs.clone(),
        serve_generator: true,
        ..standalone(tags.path())
    });
    let client = cluster.start(&TopologyConfig {
        generator_hosts: addrs.clone(),
        storage: None,
        ..standalone(tags.path())
    });

    assert!(!client.binding.was_loaded("order").await.unwrap());
    assert!(client.binding.ensure_loaded("order").await.unwrap());
    assert!(owner.binding.was_loaded("order").await.unwrap());
    assert!(!owner.binding.ensure_loaded("order").await.unwrap());

    assert_eq!(owner.binding.generate("order", 0).await.unwrap(), 1);
    assert_eq!(client.binding.generate("order", 0).await.unwrap(), 2);
    assert_eq!(
        client.binding.batch_generate("order", 3, 0).await.unwrap(),
        vec![3, 4, 5]
    );
    assert_eq!(owner.binding.generate("order", 0).await.unwrap(), 6);

    // Shards are independent sequences on the shared generator.
    assert_eq!(client.binding.generate("order", "eu").await.unwrap(), 1);
    assert_eq!(owner.binding.generate("order", 7).await.unwrap(), 1);
    assert_eq!(client.binding.generate("order", "7").await.unwrap(), 1);

    cluster.stop().await;
}

#[tokio::test]
async fn fully_remote_roles_across_three_processes() {
    let tags = tag_dir(&[("order", 10)]);
    let (mut cluster, addrs) = Cluster::with_ports(2).await;
    let (allocator_addr, generator_addr) = (addrs[0].clone(), addrs[1].clone());

    let allocator_process = cluster.start(&TopologyConfig {
        allocator_hosts: vec![allocator_addr.clone()],
        ..standalone(tags.path())
    });
    let generator_process = cluster.start(&TopologyConfig {
        allocator_hosts: vec![allocator_addr.clone()],
        generator_hosts: vec![generator_addr.clone()],
        serve_generator: true,
        storage: None,
        ..standalone(tags.path())
    });
    let client = cluster.start(&TopologyConfig {
        generator_hosts: vec![generator_addr.clone()],
        storage: None,
        ..standalone(tags.path())
    });
    assert!(generator_process.allocator_endpoint.is_none());
    assert!(generator_process.generator_endpoint.is_some());

    assert_eq!(client.binding.generate("order", 0).await.unwrap(), 1);
    assert_eq!(
        client.binding.batch_generate("order", 12, 0).await.unwrap(),
        (2..=13).collect::<Vec<_>>()
    );

    let allocator = &allocator_process.allocator_endpoint.as_ref().unwrap().service;
    assert_eq!(allocator.watermark("order", &ShardKey::default()).unwrap(), 20);

    cluster.stop().await;
}

#[tokio::test]
async fn errors_keep_their_kind_across_the_wire() {
    let tags = tag_dir(&[("order", 10)]);
    let (mut cluster, addrs) = Cluster::with_ports(1).await;

    let _owner = cluster.start(&TopologyConfig {
        generator_hosts: addrs.clone(),
        serve_generator: true,
        ..standalone(tags.path())
    });
    let client = cluster.start(&TopologyConfig {
        generator_hosts: addrs.clone(),
        storage: None,
        ..standalone(tags.path())
    });
    // Allows more per call than the generator it talks to.
    let generous = cluster.start(&TopologyConfig {
        generator_hosts: addrs.clone(),
        storage: None,
        max_batch_generate: MAX_BATCH_GENERATE * 10,
        ..standalone(tags.path())
    });

    assert!(matches!(
        client.binding.generate("missing", 0).await,
        Err(Error::UnconfiguredTag { tag }) if tag == "missing"
    ));
    assert!(matches!(
        client.binding.generate("no/slashes", 0).await,
        Err(Error::InvalidTag { .. })
    ));
    assert!(matches!(
        client
            .binding
            .batch_generate("order", MAX_BATCH_GENERATE + 1, 0)
            .await,
        Err(Error::InvalidRequest { .. })
    ));
    assert!(matches!(
        generous
            .binding
            .batch_generate("order", MAX_BATCH_GENERATE + 1, 0)
            .await,
        Err(Error::InvalidRequest { reason }) if reason.contains("1001")
    ));
    assert!(
        client
            .binding
            .batch_generate("order", 0, 0)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(!client.binding.was_loaded("order").await.unwrap());

    cluster.stop().await;
}

#[tokio::test]
async fn unreachable_allocator_is_unavailable() {
    let tags = tag_dir(&[("order", 10)]);
    let (closed, listener) = reserve_port().await;
    drop(listener);

    let topology = Topology::assemble(&TopologyConfig {
        allocator_hosts: vec![closed],
        storage: None,
        ..standalone(tags.path())
    })
    .unwrap();

    assert!(matches!(
        topology.binding.generate("order", 0).await,
        Err(Error::AllocationUnavailable { .. })
    ));
    assert!(!topology.binding.was_loaded("order").await.unwrap());
}

/// Memory storage whose writes stall like an overloaded disk.
struct SlowStorage {
    inner: MemoryStorage,
    delay: Duration,
}

impl WatermarkStorage for SlowStorage {
    fn read_watermark(&self, key: &SeqKey) -> Result<u64, StorageError> {
        self.inner.read_watermark(key)
    }

    fn write_watermark(&self, key: &SeqKey, value: u64) -> Result<(), StorageError> {
        std::thread::sleep(self.delay);
        self.inner.write_watermark(key, value)
    }

    fn compare_and_swap(
        &self,
        key: &SeqKey,
        expected: u64,
        new: u64,
    ) -> Result<(), StorageError> {
        std::thread::sleep(self.delay);
        self.inner.compare_and_swap(key, expected, new)
    }
}

#[tokio::test]
async fn deadlines_come_from_the_configured_timeout() {
    let (addr, listener) = reserve_port().await;
    let storage = SlowStorage {
        inner: MemoryStorage::new(),
        delay: Duration::from_millis(500),
    };
    let allocator = Arc::new(Allocator::new(
        Arc::new(storage),
        TagConfigs::from_steps([("order", 10)]),
    ));
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve_with_incoming(
        TcpListenerStream::new(listener),
        Services {
            batch: Some(BatchHandler::new(allocator)),
            id: None,
        },
        shutdown.clone(),
    ));

    let hasty =
        RemoteRequester::connect_lazy(&[addr.clone()], Some(Duration::from_millis(100))).unwrap();
    assert!(matches!(
        hasty.get_batch("order", &ShardKey::default()).await,
        Err(Error::AllocationUnavailable { .. })
    ));

    let patient = RemoteRequester::connect_lazy(&[addr], None).unwrap();
    let batch = patient.get_batch("order", &ShardKey::default()).await.unwrap();
    assert_eq!(batch.len, 10);

    shutdown.cancel();
    server.await.unwrap().unwrap();
}
