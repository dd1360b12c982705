//! End-to-end integration tests for the CMA.
//!
//! These drive the whole stack (listener, scheduler, router, handlers,
//! registry, ring topology, graph store and network transaction) the way
//! the daemon does: frame sets go in through a transport, packets come out
//! of it. Each test has its own store; most use the in-memory transport and
//! one runs over real loopback UDP.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

use cma_protocol::codec::{BincodeCodec, Frame, FrameCodec, FrameSet, FrameSetKind};
use cma_protocol::config::{CmaConfig, REASON_HBDEAD, THE_ONE_RING};
use cma_protocol::network::{register_default_handlers, MessageRouter, PacketListener};
use cma_protocol::registry::{ChannelObserver, EventKind, HasDiscoveryAttributes, NodeStatus};
use cma_protocol::storage::GraphStore;
use cma_protocol::transport::{MemoryTransport, Transport, UdpTransport};
use cma_protocol::{CmaContext, CmaError};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct Cma {
    transport: MemoryTransport,
    listener: PacketListener<MemoryTransport>,
    ctx: CmaContext,
}

impl Cma {
    fn with_store(store: GraphStore) -> Self {
        Self::configured(store, false)
    }

    fn configured(store: GraphStore, encryption_required: bool) -> Self {
        let transport = MemoryTransport::new();
        let config = CmaConfig {
            encryption_required,
            ..CmaConfig::default()
        };
        let ctx = CmaContext::new(config, store, transport.identities()).expect("context");
        let mut router = MessageRouter::new();
        register_default_handlers(&mut router);
        let listener = PacketListener::new(transport.clone(), router, encryption_required);
        Self {
            transport,
            listener,
            ctx,
        }
    }

    fn new() -> Self {
        Self::with_store(GraphStore::open_temporary().expect("temp store"))
    }

    fn deliver(&mut self, from: SocketAddr, fs: FrameSet) -> Result<(), CmaError> {
        self.transport.inject(from, vec![fs]);
        self.listener.handle_readiness(&mut self.ctx).map(|_| ())
    }

    fn ring_members(&self) -> Vec<String> {
        self.ctx
            .registry
            .ring(THE_ONE_RING)
            .expect("default ring")
            .members_in_ring_order(&self.ctx.store)
    }

    fn audit(&self) {
        self.ctx.registry.audit_rings(&self.ctx.store).expect("ring audit");
    }

    /// Destinations of staged heartbeat commands of `kind`, in send order.
    fn heartbeat_targets(&self, kind: FrameSetKind) -> Vec<SocketAddr> {
        self.transport
            .sent_framesets()
            .into_iter()
            .filter(|(_, fs)| fs.kind == kind)
            .map(|(dest, _)| dest)
            .collect()
    }
}

fn addr(n: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, n], 1984))
}

fn startup(name: &str) -> FrameSet {
    FrameSet::new(FrameSetKind::Startup).with_frame(Frame::Hostname(name.into()))
}

fn hbdead(dead: SocketAddr) -> FrameSet {
    FrameSet::new(FrameSetKind::HbDead).with_frame(Frame::IpPort(dead))
}

fn boot_fleet(cma: &mut Cma, names: &[&str]) {
    for (i, name) in names.iter().enumerate() {
        cma.deliver(addr(i as u8 + 1), startup(name)).expect("startup");
    }
}

// ---------------------------------------------------------------------------
// Fleet lifecycle
// ---------------------------------------------------------------------------

#[test]
fn fleet_boot_forms_a_single_ring() {
    let mut cma = Cma::new();
    boot_fleet(&mut cma, &["a", "b", "c", "d"]);

    let order = cma.ring_members();
    assert_eq!(order.len(), 4);
    let as_set: BTreeSet<_> = order.iter().cloned().collect();
    assert_eq!(as_set.len(), 4);
    cma.audit();

    assert_eq!(cma.ctx.registry.up_count(), 4);
    assert!(cma.ctx.registry.drones().all(|d| d.status == NodeStatus::Up));
    assert_eq!(cma.transport.acked().len(), 4);
    assert!(!cma.ctx.store.has_pending());
}

#[test]
fn death_in_a_ring_of_three_relinks_survivors() {
    let mut cma = Cma::new();
    boot_fleet(&mut cma, &["a", "b", "c"]);
    cma.transport.clear_recorded();

    cma.deliver(addr(9), hbdead(addr(2))).expect("hbdead");

    let survivors = cma.ring_members();
    assert_eq!(survivors.len(), 2);
    assert!(!survivors.contains(&"b".to_string()));
    cma.audit();

    let b = cma.ctx.registry.get("b").unwrap();
    assert_eq!(b.status, NodeStatus::Dead);
    assert_eq!(b.reason, REASON_HBDEAD);
    assert_eq!(cma.transport.closed(), vec![addr(2)]);

    // Every ring participant hears about it; the survivors start watching
    // each other.
    let stops: BTreeSet<_> = cma
        .heartbeat_targets(FrameSetKind::StopSendExpectHb)
        .into_iter()
        .collect();
    assert_eq!(stops, BTreeSet::from([addr(1), addr(2), addr(3)]));
    let starts: BTreeSet<_> = cma
        .heartbeat_targets(FrameSetKind::SendExpectHb)
        .into_iter()
        .collect();
    assert_eq!(starts, BTreeSet::from([addr(1), addr(3)]));
}

#[test]
fn repeated_death_report_is_absorbed() {
    let mut cma = Cma::new();
    boot_fleet(&mut cma, &["a", "b", "c"]);
    cma.deliver(addr(1), hbdead(addr(2))).unwrap();
    cma.transport.clear_recorded();

    cma.deliver(addr(3), hbdead(addr(2))).unwrap();
    assert_eq!(cma.transport.send_calls(), 0);
    assert!(cma.transport.closed().is_empty());
    assert_eq!(cma.transport.acked().len(), 1);
    cma.audit();
}

#[test]
fn restarted_drone_rejoins() {
    let mut cma = Cma::new();
    boot_fleet(&mut cma, &["a", "b", "c"]);
    cma.deliver(addr(1), hbdead(addr(2))).unwrap();
    cma.deliver(addr(2), startup("b")).unwrap();

    assert_eq!(cma.ring_members().len(), 3);
    assert_eq!(cma.ctx.registry.get("b").unwrap().status, NodeStatus::Up);
    cma.audit();
}

#[test]
fn death_report_after_an_ip_swap_reaches_the_right_drone() {
    let mut cma = Cma::new();
    boot_fleet(&mut cma, &["a", "b", "c"]);
    cma.deliver(addr(1), startup("b")).unwrap();
    cma.deliver(addr(2), startup("a")).unwrap();

    cma.deliver(addr(3), hbdead(addr(1))).unwrap();
    assert_eq!(cma.ctx.registry.get("b").unwrap().status, NodeStatus::Dead);
    assert_eq!(cma.ctx.registry.get("a").unwrap().status, NodeStatus::Up);
    let mut survivors = cma.ring_members();
    survivors.sort();
    assert_eq!(survivors, vec!["a".to_string(), "c".to_string()]);
    cma.audit();
}

#[test]
fn graceful_shutdown_keeps_the_connection() {
    let mut cma = Cma::new();
    boot_fleet(&mut cma, &["a", "b"]);
    cma.transport.clear_recorded();

    let fs = FrameSet::new(FrameSetKind::HbShutdown).with_frame(Frame::Hostname("a".into()));
    cma.deliver(addr(1), fs).unwrap();
    assert_eq!(cma.ring_members(), vec!["b".to_string()]);
    assert!(cma.transport.closed().is_empty());
    cma.audit();
}

#[test]
fn churn_keeps_the_ring_consistent() {
    let mut cma = Cma::new();
    let names: Vec<String> = (1..=8).map(|i| format!("n{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    boot_fleet(&mut cma, &refs);

    for victim in [3u8, 5, 1, 8] {
        cma.deliver(addr(2), hbdead(addr(victim))).unwrap();
        cma.audit();
    }
    assert_eq!(cma.ring_members().len(), 4);

    for back in [5u8, 1] {
        cma.deliver(addr(back), startup(&format!("n{back}"))).unwrap();
        cma.audit();
    }
    assert_eq!(cma.ring_members().len(), 6);
}

// ---------------------------------------------------------------------------
// Failure and recovery
// ---------------------------------------------------------------------------

#[test]
fn fatal_handler_leaves_committed_state_intact() {
    let mut cma = Cma::new();
    boot_fleet(&mut cma, &["a", "b"]);
    cma.transport.clear_recorded();

    let err = cma
        .deliver(addr(1), FrameSet::new(FrameSetKind::HbShutdown))
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(cma.transport.acked().is_empty());
    assert_eq!(cma.transport.send_calls(), 0);
    assert_eq!(cma.ring_members().len(), 2);
    assert_eq!(cma.ctx.registry.up_count(), 2);
    cma.audit();
}

#[test]
fn warm_restart_restores_registry_and_rings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph");

    {
        let mut cma = Cma::with_store(GraphStore::open(&path).unwrap());
        boot_fleet(&mut cma, &["a", "b", "c"]);
        cma.deliver(addr(1), hbdead(addr(3))).unwrap();
    }

    let mut cma = Cma::with_store(GraphStore::open(&path).unwrap());
    assert_eq!(cma.ctx.registry.drone_count(), 3);
    assert_eq!(cma.ctx.registry.up_count(), 2);
    assert_eq!(cma.ctx.registry.get("c").unwrap().status, NodeStatus::Dead);
    assert_eq!(cma.ring_members().len(), 2);
    cma.audit();

    cma.deliver(addr(4), startup("d")).unwrap();
    assert_eq!(cma.ring_members().len(), 3);
    cma.audit();
}

#[test]
fn encrypted_fleet_survives_a_warm_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph");

    {
        let mut cma = Cma::configured(GraphStore::open(&path).unwrap(), true);
        cma.deliver(addr(1), startup("a").signed_by("a-key")).unwrap();
        cma.deliver(addr(2), startup("b").signed_by("b-key")).unwrap();
    }

    let mut cma = Cma::configured(GraphStore::open(&path).unwrap(), true);
    let identities = cma.transport.identities();
    assert_eq!(identities.key_id(&addr(1)).as_deref(), Some("a-key"));
    assert_eq!(identities.key_id(&addr(2)).as_deref(), Some("b-key"));

    // Joining relinks a and b, which must still be addressable.
    cma.deliver(addr(3), startup("c").signed_by("c-key")).unwrap();
    assert_eq!(cma.ring_members().len(), 3);
    assert!(!cma.heartbeat_targets(FrameSetKind::SendExpectHb).is_empty());
    cma.audit();
}

// ---------------------------------------------------------------------------
// Discovery and events
// ---------------------------------------------------------------------------

#[test]
fn discovery_updates_drone_and_notifies_observers() {
    let mut cma = Cma::new();
    let (observer, mut events) = ChannelObserver::new(64);
    cma.ctx.registry.events_mut().register(observer);

    cma.deliver(addr(1), startup("a")).unwrap();
    let json = r#"{"discovertype":"tcpdiscovery","host":"a","data":{"sshd":22}}"#;
    let fs = FrameSet::new(FrameSetKind::JsDiscovery).with_frame(Frame::DiscJson(json.into()));
    cma.deliver(addr(1), fs.clone()).unwrap();
    // Same payload again: absorbed, no event.
    cma.deliver(addr(1), fs).unwrap();

    let drone = cma.ctx.registry.get("a").unwrap();
    assert_eq!(drone.discovery("tcpdiscovery"), Some(json));
    assert!(drone.monitors_activated);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(kinds, vec![EventKind::Create, EventKind::Up, EventKind::Update]);
}

// ---------------------------------------------------------------------------
// Over the wire
// ---------------------------------------------------------------------------

#[tokio::test]
async fn startup_over_udp_gets_config_and_ack() {
    let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let cma_addr = transport.local_addr().unwrap();
    let socket = transport.socket();
    let mut ctx = CmaContext::new(
        CmaConfig::default(),
        GraphStore::open_temporary().unwrap(),
        transport.identities(),
    )
    .unwrap();
    let mut router = MessageRouter::new();
    register_default_handlers(&mut router);
    let mut listener = PacketListener::new(transport, router, false);

    let drone = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let codec = BincodeCodec;
    let datagram = codec.encode(&[startup("udp-drone")]).unwrap();
    drone.send_to(&datagram, cma_addr).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            socket.readable().await.unwrap();
            let report = listener.handle_readiness(&mut ctx).unwrap();
            if report.dispatched > 0 {
                break;
            }
        }
    })
    .await
    .expect("STARTUP dispatched");

    let mut buf = vec![0u8; 65_536];
    let mut kinds = Vec::new();
    for _ in 0..2 {
        let (len, from) = tokio::time::timeout(Duration::from_secs(5), drone.recv_from(&mut buf))
            .await
            .expect("reply")
            .unwrap();
        assert_eq!(from, cma_addr);
        kinds.extend(codec.decode(&buf[..len]).unwrap().into_iter().map(|fs| fs.kind));
    }
    assert_eq!(kinds.first(), Some(&FrameSetKind::SetConfig));
    assert_eq!(kinds.last(), Some(&FrameSetKind::Ack));
    assert!(ctx.registry.get("udp-drone").is_some());
}
