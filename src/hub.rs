//! The hub ("nucleus"): tracks every currently-connected client and
//! serialises membership changes through a single actor task (spec §4.E;
//! `original_source/modules/nucleus.go`, `nucleus_module.go`). Membership
//! mutations go through two channels; proximity-loop reads snapshot the
//! map directly under a shared lock, matching the original's `RWMutex`.
//!
//! Unlike the Go original, Rust's ownership makes the "weak handle" trick
//! (spec §9) unnecessary: once a client is removed from `clients`, nothing
//! else keeps it alive past its own disconnect cleanup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::client::ClientHandle;
use crate::codec::Envelope;

enum HubCommand {
    Subscribe(ClientHandle),
    Unsubscribe { uuid: Uuid, ack: oneshot::Sender<()> },
}

#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
    clients: Arc<RwLock<HashMap<Uuid, ClientHandle>>>,
}

impl HubHandle {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let clients = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(Self::run(rx, clients.clone()));
        Self {
            commands: tx,
            clients,
        }
    }

    /// Enqueues a client for registration. Returns immediately; the actor
    /// inserts it under exclusive lock in the order commands arrive.
    pub fn subscribe(&self, client: ClientHandle) {
        if self.commands.send(HubCommand::Subscribe(client)).is_err() {
            log::error!("hub actor is gone, dropping subscribe");
        }
    }

    /// Removes `uuid` and waits for the removal to be applied. After this
    /// returns, no snapshot taken by any proximity loop will contain the
    /// client.
    pub async fn unsubscribe(&self, uuid: Uuid) {
        let (ack, ack_rx) = oneshot::channel();
        if self
            .commands
            .send(HubCommand::Unsubscribe { uuid, ack })
            .is_err()
        {
            log::error!("hub actor is gone, dropping unsubscribe for {uuid}");
            return;
        }
        let _ = ack_rx.await;
    }

    pub async fn get(&self, uuid: Uuid) -> Option<ClientHandle> {
        self.clients.read().await.get(&uuid).cloned()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Every connected client except `exclude`, read directly under the
    /// shared lock (no round-trip through the actor).
    pub async fn snapshot_peers(&self, exclude: Uuid) -> Vec<ClientHandle> {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| c.uuid() != exclude)
            .cloned()
            .collect()
    }

    /// Clients already registered under the same remote address as a
    /// not-yet-admitted connection (spec §4.E duplicate-address policy).
    pub async fn clients_with_ip(&self, ip_addr: &str) -> Vec<ClientHandle> {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| c.ip_addr() == ip_addr)
            .cloned()
            .collect()
    }

    pub async fn broadcast_except(&self, exclude: Uuid, envelope: Envelope) {
        for client in self.clients.read().await.values() {
            if client.uuid() != exclude {
                client.send(envelope.clone());
            }
        }
    }

    async fn run(
        mut commands: mpsc::UnboundedReceiver<HubCommand>,
        clients: Arc<RwLock<HashMap<Uuid, ClientHandle>>>,
    ) {
        log::info!("hub started");
        while let Some(cmd) = commands.recv().await {
            match cmd {
                HubCommand::Subscribe(client) => {
                    let uuid = client.uuid();
                    let mut guard = clients.write().await;
                    guard.insert(uuid, client);
                    log::info!("client {uuid} subscribed, {} connected", guard.len());
                }
                HubCommand::Unsubscribe { uuid, ack } => {
                    let mut guard = clients.write().await;
                    guard.remove(&uuid);
                    log::info!("client {uuid} unsubscribed, {} connected", guard.len());
                    drop(guard);
                    let _ = ack.send(());
                }
            }
        }
        log::warn!("hub actor shutting down, no senders remain");
    }
}

impl Default for HubHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::spawn_test_client;

    #[tokio::test]
    async fn subscribed_client_is_visible_in_snapshot() {
        let hub = HubHandle::new();
        let a = spawn_test_client("10.0.0.1", hub.clone());
        let b = spawn_test_client("10.0.0.2", hub.clone());

        let peers = hub.snapshot_peers(a.handle.uuid()).await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].uuid(), b.handle.uuid());
        assert!(hub.get(a.handle.uuid()).await.is_some());
    }

    #[tokio::test]
    async fn unsubscribe_removes_from_every_snapshot() {
        let hub = HubHandle::new();
        let a = spawn_test_client("10.0.0.1", hub.clone());
        let b = spawn_test_client("10.0.0.2", hub.clone());

        hub.unsubscribe(a.handle.uuid()).await;

        assert!(hub.get(a.handle.uuid()).await.is_none());
        assert!(hub.snapshot_peers(b.handle.uuid()).await.is_empty());
    }

    #[tokio::test]
    async fn clients_with_ip_matches_only_that_address() {
        let hub = HubHandle::new();
        let a = spawn_test_client("10.0.0.1", hub.clone());
        let _b = spawn_test_client("10.0.0.2", hub.clone());

        let matches = hub.clients_with_ip("10.0.0.1").await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].uuid(), a.handle.uuid());
        assert!(hub.clients_with_ip("10.0.0.9").await.is_empty());
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_excluded_client() {
        let hub = HubHandle::new();
        let mut a = spawn_test_client("10.0.0.1", hub.clone());
        let mut b = spawn_test_client("10.0.0.2", hub.clone());

        hub.broadcast_except(a.handle.uuid(), Envelope::empty("peer_disconnected"))
            .await;

        assert!(a.outbox.try_recv().is_err());
        assert_eq!(b.outbox.try_recv().unwrap().event, "peer_disconnected");
    }

    #[tokio::test]
    async fn client_count_tracks_membership() {
        let hub = HubHandle::new();
        assert_eq!(hub.client_count().await, 0);
        let _a = spawn_test_client("10.0.0.1", hub.clone());
        let b = spawn_test_client("10.0.0.2", hub.clone());
        assert_eq!(hub.client_count().await, 2);
        hub.unsubscribe(b.handle.uuid()).await;
        assert_eq!(hub.client_count().await, 1);
    }
}
