//! IPC Router client bring-up: socket open, service lookup, security rules, DPM priming.
//!
//! Grounded in `original_source/.../ipc.c`'s `open_ipc_socket`, `is_server_active`,
//! `find_services`, `get_node_port`, `setup_ipc_security`, and `init_port_mapper`. The original
//! talks to a bespoke Linux IPC Router socket family (`AF_MSM_IPC`); this crate models that
//! socket as a trait so the bring-up sequencing (open, then wait for the router to report itself
//! active, then resolve the QMI services we need, then install security rules, then prime the
//! Dynamic Port Mapper) is unit-testable without the real kernel module.
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::{BridgeError, BridgeResult};
use crate::qmi::frame::QmiFrame;

/// Node id reserved by the IPC Router itself; never a valid service endpoint.
pub const RESERVED_NODE: u32 = 41;

/// Security-rule fields the original installs for every service this process talks to.
pub const SECURITY_UID: u32 = 54;
pub const SECURITY_GID: u32 = 54;
pub const SECURITY_CATEGORIES: u32 = 511;

/// How often `init_port_mapper` retries priming the Dynamic Port Mapper until it's acknowledged.
pub const DPM_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// One resolved `(node_id, port_id)` pair for a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub node_id: u32,
    pub port_id: u32,
}

/// Abstraction over the IPC Router socket family, so bring-up logic can be tested against a fake.
#[async_trait]
pub trait IpcSocket: Send + Sync {
    async fn is_server_active(&self) -> bool;
    async fn find_services(&self, service: u32, instance: u32) -> BridgeResult<Vec<ServiceEndpoint>>;
    async fn install_security_rule(&self, service: u32, uid: u32, gid: u32, categories: u32) -> BridgeResult<()>;
    async fn send_raw(&self, node_id: u32, port_id: u32, data: &[u8]) -> BridgeResult<()>;
}

/// Resolve `(service, instance)` to a usable endpoint, filtering out the router's reserved node
/// (`find_services`/`get_node_port` in the original silently skip it, since a client matching the
/// reserved node would otherwise mistake the router itself for a service).
pub async fn resolve_service(
    sock: &dyn IpcSocket,
    service: u32,
    instance: u32,
) -> BridgeResult<ServiceEndpoint> {
    let endpoints = sock.find_services(service, instance).await?;
    endpoints
        .into_iter()
        .find(|ep| ep.node_id != RESERVED_NODE)
        .ok_or(BridgeError::LookupMiss { service, instance })
}

/// Wait (polling, matching the original's busy-wait on `is_server_active`) until the router
/// reports itself ready, then install the security rules this process needs for every service it
/// bridges.
pub async fn bring_up(sock: &dyn IpcSocket, services: &[u32]) -> BridgeResult<()> {
    let mut attempts = 0;
    while !sock.is_server_active().await {
        attempts += 1;
        if attempts > 50 {
            return Err(BridgeError::NoSocket { service: 0, instance: 0 });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    for &service in services {
        sock.install_security_rule(service, SECURITY_UID, SECURITY_GID, SECURITY_CATEGORIES)
            .await
            .map_err(|_| BridgeError::RuleRejected { category: SECURITY_CATEGORIES })?;
        debug!(service, "installed IPC router security rule");
    }
    Ok(())
}

/// Hand-craft and send the Dynamic Port Mapper priming packet, retrying at
/// [`DPM_RETRY_INTERVAL`] until the caller observes it's been acknowledged elsewhere (the original
/// doesn't wait for a DPM reply synchronously either; it just keeps resending on a timer).
pub async fn init_port_mapper(sock: &dyn IpcSocket, endpoint: ServiceEndpoint, frame: &QmiFrame) -> BridgeResult<()> {
    let bytes = frame.to_bytes();
    loop {
        match sock.send_raw(endpoint.node_id, endpoint.port_id, &bytes).await {
            Ok(()) => {
                info!(node = endpoint.node_id, port = endpoint.port_id, "primed port mapper");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "port mapper priming failed, retrying");
                tokio::time::sleep(DPM_RETRY_INTERVAL).await;
            }
        }
    }
}
