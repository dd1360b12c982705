//! The standard frame-set handlers.
//!
//! [`register_default_handlers`] wires every kind the CMA understands into a
//! [`MessageRouter`]. Handlers run inside the router's commit protocol: they
//! mutate the registry and stage packets, they never send.

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use super::router::MessageRouter;
use crate::codec::{Frame, FrameSet, FrameSetKind};
use crate::config::{REASON_HBDEAD, REASON_HBSHUTDOWN};
use crate::context::CmaContext;
use crate::error::{CmaError, CmaResult};
use crate::registry::{DiscoveryPayload, NodeStatus};

/// Registers the handlers for STARTUP, HBDEAD, HBSHUTDOWN, JSDISCOVERY,
/// HBLATE, HBBACKALIVE, HBMARTIAN and CONNSHUT.
pub fn register_default_handlers(router: &mut MessageRouter) {
    router.register(FrameSetKind::Startup, handle_startup);
    router.register(FrameSetKind::HbDead, handle_hbdead);
    router.register(FrameSetKind::HbShutdown, handle_hbshutdown);
    router.register(FrameSetKind::JsDiscovery, handle_jsdiscovery);
    router.register(FrameSetKind::HbLate, handle_peer_notice);
    router.register(FrameSetKind::HbBackAlive, handle_peer_notice);
    router.register(FrameSetKind::HbMartian, handle_peer_notice);
    router.register(FrameSetKind::ConnShut, handle_connshut);
}

fn malformed(frameset: &FrameSet, from: SocketAddr, detail: &str) -> CmaError {
    CmaError::Malformed {
        kind: frameset.kind,
        from,
        detail: detail.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

/// A drone announcing itself.
fn handle_startup(ctx: &mut CmaContext, source: SocketAddr, fs: &FrameSet) -> CmaResult<()> {
    let designation = fs
        .hostname()
        .ok_or_else(|| malformed(fs, source, "no hostname frame"))?
        .to_string();
    info!(designation = %designation, from = %source, "drone registering");

    ctx.registry.admit(
        &mut ctx.store,
        &mut ctx.txn,
        &ctx.config,
        &designation,
        source,
        fs.sender_key_id.as_deref(),
    )?;

    for json in fs.discovery_payloads() {
        match DiscoveryPayload::parse(json) {
            Some(payload) => {
                ctx.registry.record_discovery(
                    &mut ctx.store,
                    &ctx.config.domain,
                    &designation,
                    &payload.discovertype,
                    json,
                )?;
            }
            None => warn!(designation = %designation, "ignoring invalid discovery JSON in STARTUP"),
        }
    }
    Ok(())
}

/// A peer reporting that the drones it names stopped heartbeating.
fn handle_hbdead(ctx: &mut CmaContext, source: SocketAddr, fs: &FrameSet) -> CmaResult<()> {
    let reporter = ctx
        .registry
        .find_by_ip(source.ip())
        .map(|d| d.designation.clone())
        .unwrap_or_else(|| source.to_string());

    for ip in fs.ip_addrs() {
        let Some(dead) = ctx.registry.find_by_ip(ip).map(|d| d.designation.clone()) else {
            warn!(reporter = %reporter, dead_ip = %ip, "HBDEAD for an address we do not know");
            continue;
        };
        debug!(reporter = %reporter, designation = %dead, "HBDEAD");
        ctx.registry.death_report(
            &mut ctx.store,
            &mut ctx.txn,
            &dead,
            NodeStatus::Dead,
            REASON_HBDEAD,
            source,
        )?;
    }
    Ok(())
}

/// A drone reporting its own orderly shutdown.
fn handle_hbshutdown(ctx: &mut CmaContext, source: SocketAddr, fs: &FrameSet) -> CmaResult<()> {
    let designation = fs
        .hostname()
        .ok_or_else(|| malformed(fs, source, "no hostname frame"))?;
    info!(designation, from = %source, "drone shutting down");
    ctx.registry.death_report(
        &mut ctx.store,
        &mut ctx.txn,
        designation,
        NodeStatus::Dead,
        REASON_HBSHUTDOWN,
        source,
    )?;
    Ok(())
}

/// Heartbeat anomalies reported by a peer. Informational only.
fn handle_peer_notice(ctx: &mut CmaContext, source: SocketAddr, fs: &FrameSet) -> CmaResult<()> {
    let peers: Vec<String> = fs
        .ip_addrs()
        .into_iter()
        .map(|ip| match ctx.registry.find_by_ip(ip) {
            Some(drone) => drone.designation.clone(),
            None => ip.to_string(),
        })
        .collect();
    warn!(kind = %fs.kind, from = %source, peers = ?peers, "heartbeat anomaly reported");
    Ok(())
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Discovery results. A hostname frame names the drone for the JSON frame
/// that follows it; otherwise the JSON's own `host` field does.
fn handle_jsdiscovery(ctx: &mut CmaContext, source: SocketAddr, fs: &FrameSet) -> CmaResult<()> {
    let mut hostname: Option<&str> = None;

    for frame in &fs.frames {
        match frame {
            Frame::Hostname(name) => hostname = Some(name.as_str()),
            Frame::DiscJson(json) => {
                let Some(payload) = DiscoveryPayload::parse(json) else {
                    warn!(from = %source, "bad discovery JSON");
                    return Ok(());
                };
                let designation = match hostname.take().map(str::to_string).or(payload.host) {
                    Some(name) => name,
                    None => {
                        warn!(from = %source, discovertype = %payload.discovertype, "discovery names no host");
                        continue;
                    }
                };
                ctx.registry.record_discovery(
                    &mut ctx.store,
                    &ctx.config.domain,
                    &designation,
                    &payload.discovertype,
                    json,
                )?;
            }
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

fn handle_connshut(ctx: &mut CmaContext, source: SocketAddr, _fs: &FrameSet) -> CmaResult<()> {
    debug!(from = %source, "peer shut its connection");
    ctx.txn.close_connection(source);
    Ok(())
}
