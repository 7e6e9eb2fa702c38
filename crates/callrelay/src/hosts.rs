/// Peer selection for relayed calls.
///
/// The relay asks a [`Hosts`] implementation once per call where to forward
/// it. [`HostTable`] is the bundled implementation: per-service peer pools
/// with round-robin rotation and method-level pinning.
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::frame::{display_name, CallFrame};

// ── Peer address ──────────────────────────────────────────────────────

/// Address of a downstream peer (`host:port`).
///
/// Never empty: the only way to say "no peer" is `None` from [`Hosts::get`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddr(String);

impl PeerAddr {
    pub fn parse(addr: impl Into<String>) -> Result<Self, RelayError> {
        let addr = addr.into();
        if addr.trim().is_empty() {
            return Err(RelayError::InvalidPeerAddr(addr));
        }
        Ok(Self(addr))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PeerAddr {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeerAddr {
    type Error = RelayError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<PeerAddr> for String {
    fn from(addr: PeerAddr) -> Self {
        addr.0
    }
}

// ── Selector contract ─────────────────────────────────────────────────

/// Chooses the destination peer for a call.
///
/// Shared by every in-flight call, so implementations synchronize
/// internally. Must return promptly: no network I/O on this path.
pub trait Hosts: Send + Sync {
    /// Best peer for `call`, or `None` when no peer can take it.
    fn get(&self, call: &dyn CallFrame) -> Option<PeerAddr>;
}

impl<F> Hosts for F
where
    F: Fn(&dyn CallFrame) -> Option<PeerAddr> + Send + Sync,
{
    fn get(&self, call: &dyn CallFrame) -> Option<PeerAddr> {
        self(call)
    }
}

// ── Peer pool ─────────────────────────────────────────────────────────

/// Current status of a known peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Online,
    Offline,
    /// Silent past the staleness threshold. Skipped until seen again.
    Stale,
}

/// A peer serving some destination service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub addr: PeerAddr,
    pub status: PeerStatus,
    /// Unix ms timestamp of last observed activity. Drives
    /// [`HostTable::expire_stale`].
    pub last_seen: u64,
}

impl PeerInfo {
    pub fn online(addr: PeerAddr, last_seen: u64) -> Self {
        Self {
            addr,
            status: PeerStatus::Online,
            last_seen,
        }
    }
}

/// Why a particular peer was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    /// Method is pinned to this peer.
    Pinned,
    /// Only online peer for the service.
    OnlyOption,
    /// Next online peer in rotation.
    RoundRobin,
    NoPeerAvailable,
}

/// Result of peer selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSelection {
    pub peer: Option<PeerAddr>,
    pub reason: SelectionReason,
}

#[derive(Debug, Default)]
struct ServicePool {
    peers: Vec<PeerInfo>,
    /// Method name → pinned peer.
    pinned: HashMap<Vec<u8>, PeerAddr>,
    cursor: AtomicUsize,
}

impl ServicePool {
    fn is_online(&self, addr: &PeerAddr) -> bool {
        self.peers
            .iter()
            .any(|p| &p.addr == addr && p.status == PeerStatus::Online)
    }
}

/// Per-service peer pools, keyed by destination service name.
///
/// Updated by whatever discovers peers (health checks, config reloads);
/// read by every call through [`Hosts`].
#[derive(Debug, Default)]
pub struct HostTable {
    services: RwLock<HashMap<Vec<u8>, ServicePool>>,
}

impl HostTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a peer of `service`.
    pub fn upsert(&self, service: &[u8], info: PeerInfo) {
        let mut services = self.write();
        let pool = services.entry(service.to_vec()).or_default();
        match pool.peers.iter_mut().find(|p| p.addr == info.addr) {
            Some(existing) => *existing = info,
            None => pool.peers.push(info),
        }
    }

    /// Remove a peer from `service`. Pins pointing at it are dropped too.
    pub fn remove(&self, service: &[u8], addr: &PeerAddr) -> bool {
        let mut services = self.write();
        let Some(pool) = services.get_mut(service) else {
            return false;
        };
        let before = pool.peers.len();
        pool.peers.retain(|p| &p.addr != addr);
        pool.pinned.retain(|_, pinned| pinned != addr);
        let removed = pool.peers.len() != before;
        if pool.peers.is_empty() && pool.pinned.is_empty() {
            services.remove(service);
        }
        removed
    }

    /// Update the status of a known peer. Returns `false` if unknown.
    pub fn set_status(&self, service: &[u8], addr: &PeerAddr, status: PeerStatus) -> bool {
        let mut services = self.write();
        let Some(peer) = services
            .get_mut(service)
            .and_then(|pool| pool.peers.iter_mut().find(|p| &p.addr == addr))
        else {
            return false;
        };
        peer.status = status;
        true
    }

    /// Record activity from a known peer at `now_ms`.
    ///
    /// A stale peer comes back online. An offline peer stays offline: that
    /// status is only lifted through [`set_status`](Self::set_status).
    pub fn record_seen(&self, service: &[u8], addr: &PeerAddr, now_ms: u64) -> bool {
        let mut services = self.write();
        let Some(peer) = services
            .get_mut(service)
            .and_then(|pool| pool.peers.iter_mut().find(|p| &p.addr == addr))
        else {
            return false;
        };
        peer.last_seen = peer.last_seen.max(now_ms);
        if peer.status == PeerStatus::Stale {
            peer.status = PeerStatus::Online;
        }
        true
    }

    /// Mark online peers silent for at least `stale_after_ms` as stale.
    ///
    /// Stale peers are skipped by selection until they are seen again.
    /// Returns the number of peers that went stale.
    pub fn expire_stale(&self, now_ms: u64, stale_after_ms: u64) -> usize {
        let mut services = self.write();
        let mut expired = 0;
        for (service, pool) in services.iter_mut() {
            for peer in pool.peers.iter_mut() {
                if peer.status == PeerStatus::Online
                    && now_ms.saturating_sub(peer.last_seen) >= stale_after_ms
                {
                    peer.status = PeerStatus::Stale;
                    expired += 1;
                    tracing::debug!(
                        "hosts: {} of {} went stale",
                        peer.addr,
                        display_name(service)
                    );
                }
            }
        }
        expired
    }

    /// Route every call to `service::method` to `addr` while it is online.
    pub fn pin_method(&self, service: &[u8], method: &[u8], addr: PeerAddr) {
        self.write()
            .entry(service.to_vec())
            .or_default()
            .pinned
            .insert(method.to_vec(), addr);
    }

    pub fn unpin_method(&self, service: &[u8], method: &[u8]) -> bool {
        self.write()
            .get_mut(service)
            .is_some_and(|pool| pool.pinned.remove(method).is_some())
    }

    /// All peers known for `service`, in insertion order.
    pub fn peers(&self, service: &[u8]) -> Vec<PeerInfo> {
        self.read()
            .get(service)
            .map(|pool| pool.peers.clone())
            .unwrap_or_default()
    }

    /// Number of services with at least one peer or pin.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Select the peer for `call`.
    ///
    /// A pinned method wins while its peer is online; otherwise online
    /// peers of the destination service are rotated round-robin.
    pub fn select(&self, call: &dyn CallFrame) -> HostSelection {
        let services = self.read();
        let Some(pool) = services.get(call.service()) else {
            return HostSelection {
                peer: None,
                reason: SelectionReason::NoPeerAvailable,
            };
        };

        if let Some(pinned) = pool.pinned.get(call.method()) {
            if pool.is_online(pinned) {
                return HostSelection {
                    peer: Some(pinned.clone()),
                    reason: SelectionReason::Pinned,
                };
            }
        }

        let online: Vec<&PeerInfo> = pool
            .peers
            .iter()
            .filter(|p| p.status == PeerStatus::Online)
            .collect();

        match online.len() {
            0 => HostSelection {
                peer: None,
                reason: SelectionReason::NoPeerAvailable,
            },
            1 => HostSelection {
                peer: Some(online[0].addr.clone()),
                reason: SelectionReason::OnlyOption,
            },
            n => {
                let idx = pool.cursor.fetch_add(1, Ordering::Relaxed) % n;
                HostSelection {
                    peer: Some(online[idx].addr.clone()),
                    reason: SelectionReason::RoundRobin,
                }
            }
        }
    }

    // A writer panicking mid-update leaves plain data behind; keep serving.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Vec<u8>, ServicePool>> {
        self.services.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Vec<u8>, ServicePool>> {
        self.services.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Hosts for HostTable {
    fn get(&self, call: &dyn CallFrame) -> Option<PeerAddr> {
        let selection = self.select(call);
        if selection.peer.is_none() {
            tracing::warn!(
                "hosts: no peer for {}::{}",
                display_name(call.service()),
                display_name(call.method())
            );
        }
        selection.peer
    }
}
