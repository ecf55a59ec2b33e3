//! The per-client actor: a reader, a writer, an audio routing loop and a
//! proximity loop cooperating over a handful of locks and channels (spec
//! §4.F, §5; `original_source/modules/client_module.go`).
//!
//! `ClientHandle` is a cheap `Arc` clone handed to the hub, to peers during
//! registration, and to the four tasks below. None of them own the
//! `RTCPeerConnection` outright; it lives behind a lock because it is
//! created lazily on `wrtc_connect` and torn down on disconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitStream, StreamExt};
use tokio::sync::{mpsc, Notify, RwLock};
use uuid::Uuid;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet as RtpPacket;

use crate::audio::AudioBundle;
use crate::codec::{decode, InboundEvent};
use crate::codec::Envelope;
use crate::config::Settings;
use crate::geo::{LocationBundle, LocationData};
use crate::hub::HubHandle;
use crate::registration;
use crate::signaling;
use crate::socket::{OutboundWriter, ThreadSafeWriter};

struct ClientInner {
    uuid: Uuid,
    ip_addr: String,
    hub: HubHandle,
    writer: Arc<dyn OutboundWriter>,
    write_tx: mpsc::UnboundedSender<Envelope>,
    peer_connection: RwLock<Option<Arc<RTCPeerConnection>>>,
    registered: RwLock<HashMap<Uuid, AudioBundle>>,
    location: RwLock<Option<LocationData>>,
    avatar: RwLock<Option<String>>,
    stop_lac: Notify,
    lac_stopped: Notify,
    stop_routing_audio: Notify,
    disconnect_started: AtomicBool,
    shutdown_started: AtomicBool,
}

#[derive(Clone)]
pub struct ClientHandle(Arc<ClientInner>);

impl ClientHandle {
    pub fn uuid(&self) -> Uuid {
        self.0.uuid
    }

    pub fn ip_addr(&self) -> &str {
        &self.0.ip_addr
    }

    pub fn send(&self, envelope: Envelope) {
        if self.0.write_tx.send(envelope).is_err() {
            log::debug!("client {} writer gone, dropping outbound message", self.uuid());
        }
    }

    pub async fn peer_connection(&self) -> Option<Arc<RTCPeerConnection>> {
        self.0.peer_connection.read().await.clone()
    }

    pub async fn set_peer_connection(&self, pc: Arc<RTCPeerConnection>) {
        *self.0.peer_connection.write().await = Some(pc);
    }

    pub async fn has_peer_connection(&self) -> bool {
        self.0.peer_connection.read().await.is_some()
    }

    pub async fn current_location(&self) -> Option<LocationData> {
        *self.0.location.read().await
    }

    pub async fn set_location(&self, location: LocationData) {
        *self.0.location.write().await = Some(location);
    }

    pub async fn avatar(&self) -> Option<String> {
        self.0.avatar.read().await.clone()
    }

    pub async fn set_avatar(&self, avatar: String) {
        *self.0.avatar.write().await = Some(avatar);
    }

    pub async fn has_registration(&self, dest: Uuid) -> bool {
        self.0.registered.read().await.contains_key(&dest)
    }

    pub(crate) async fn insert_registration(&self, dest: Uuid, bundle: AudioBundle) {
        self.0.registered.write().await.insert(dest, bundle);
    }

    pub(crate) async fn take_registration(&self, dest: Uuid) -> Option<AudioBundle> {
        self.0.registered.write().await.remove(&dest)
    }
}

/// Spawns the reader and writer tasks for a newly upgraded WebSocket and
/// subscribes the client to the hub. The audio routing loop and proximity
/// loop only start once `wrtc_connect` creates a peer connection (spec
/// §4.F mirrors `original_source/modules/webrtc_module.go::createPeerConnection`,
/// which starts both goroutines itself).
pub fn spawn(ip_addr: String, hub: HubHandle, settings: Arc<Settings>, socket: WebSocket) -> ClientHandle {
    let uuid = Uuid::new_v4();
    let (sink, stream) = socket.split();
    let writer: Arc<dyn OutboundWriter> = Arc::new(ThreadSafeWriter::new(sink));
    let (write_tx, write_rx) = mpsc::unbounded_channel();

    let inner = Arc::new(ClientInner {
        uuid,
        ip_addr,
        hub: hub.clone(),
        writer: writer.clone(),
        write_tx,
        peer_connection: RwLock::new(None),
        registered: RwLock::new(HashMap::new()),
        location: RwLock::new(None),
        avatar: RwLock::new(None),
        stop_lac: Notify::new(),
        lac_stopped: Notify::new(),
        stop_routing_audio: Notify::new(),
        disconnect_started: AtomicBool::new(false),
        shutdown_started: AtomicBool::new(false),
    });
    let client = ClientHandle(inner);

    hub.subscribe(client.clone());
    log::info!("client {uuid} connected from {}", client.ip_addr());

    tokio::spawn(run_writer(client.clone(), writer, write_rx));
    tokio::spawn(run_reader(client.clone(), stream, settings));

    client
}

/// Starts the two loops gated on having a peer connection: audio routing
/// (consumes `inbound_audio_rx`, fed by the `on_track` handler in
/// `signaling::create_peer_connection`) and the proximity loop.
pub(crate) fn start_connected_loops(
    client: ClientHandle,
    inbound_audio_rx: mpsc::Receiver<RtpPacket>,
    settings: Arc<Settings>,
) {
    tokio::spawn(run_routing_loop(client.clone(), inbound_audio_rx));
    tokio::spawn(run_proximity_loop(client, settings));
}

async fn run_reader(client: ClientHandle, mut stream: SplitStream<WebSocket>, settings: Arc<Settings>) {
    log::info!("client {} reader started", client.uuid());
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                log::error!("read error for client {}: {e}", client.uuid());
                break;
            }
        };
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => continue,
        };
        match decode(&text) {
            Ok(event) => handle_inbound_event(&client, event, &settings).await,
            Err(e) => log::error!("malformed message from {}: {e}", client.uuid()),
        }
    }
    shutdown_client(&client).await;
}

async fn run_writer(
    client: ClientHandle,
    writer: Arc<dyn OutboundWriter>,
    mut write_rx: mpsc::UnboundedReceiver<Envelope>,
) {
    log::info!("client {} writer started", client.uuid());
    while let Some(envelope) = write_rx.recv().await {
        let text = match serde_json::to_string(&envelope) {
            Ok(t) => t,
            Err(e) => {
                log::error!("failed to encode outbound envelope for {}: {e}", client.uuid());
                continue;
            }
        };
        if let Err(e) = writer.write_text(text).await {
            log::error!("write error for client {}: {e}", client.uuid());
            break;
        }
    }
    shutdown_client(&client).await;
}

async fn handle_inbound_event(client: &ClientHandle, event: InboundEvent, settings: &Arc<Settings>) {
    match event {
        InboundEvent::WrtcConnect => signaling::create_peer_connection(client.clone(), settings.clone()).await,
        InboundEvent::WrtcOffer(offer) => signaling::handle_offer(client, settings.clone(), offer).await,
        InboundEvent::WrtcAnswer(answer) => signaling::handle_answer(client, answer).await,
        InboundEvent::WrtcCandidate(candidate) => signaling::handle_ice_candidate(client, candidate).await,
        InboundEvent::WrtcRenegotiationNeeded(offer) => signaling::handle_renegotiation(client, offer).await,
        InboundEvent::WrtcDisconnect => handle_disconnect(client).await,
        // "voice" self-registers a loopback transceiver carrying the
        // client's own inbound audio; matches the original's
        // `register(client, client)` exactly.
        InboundEvent::Voice => registration::register(client, client).await,
        InboundEvent::Mute => shutdown_client(client).await,
        InboundEvent::UpdateLocation(location) => update_client_location(client, location).await,
        InboundEvent::SetCurrentAvatar(avatar) => {
            log::debug!("client {} set avatar", client.uuid());
            client.set_avatar(avatar).await;
        }
    }
}

async fn update_client_location(client: &ClientHandle, location: LocationData) {
    client.set_location(location).await;
    let bundle = LocationBundle {
        uuid: client.uuid(),
        location,
        avatar: client.avatar().await,
    };
    match Envelope::new("peer_location", bundle) {
        Ok(envelope) => client.0.hub.broadcast_except(client.uuid(), envelope).await,
        Err(e) => log::error!("failed to encode location update for {}: {e}", client.uuid()),
    }
}

fn peer_status_envelope(connected: bool, peer_uuid: Uuid) -> Envelope {
    let data = if connected {
        format!("connected peer{peer_uuid}")
    } else {
        format!("disconnected peer{peer_uuid}")
    };
    Envelope::new("peer", data).expect("a plain string always serializes to JSON")
}

fn remove_stream_envelope(peer_uuid: Uuid) -> Envelope {
    Envelope::new("wrtc_remove_stream", peer_uuid.to_string())
        .expect("a uuid string always serializes to JSON")
}

async fn run_routing_loop(client: ClientHandle, mut inbound_audio_rx: mpsc::Receiver<RtpPacket>) {
    log::info!("client {} audio routing started", client.uuid());
    loop {
        tokio::select! {
            _ = client.0.stop_routing_audio.notified() => {
                log::info!("client {} stopped audio routing", client.uuid());
                return;
            }
            packet = inbound_audio_rx.recv() => {
                let Some(packet) = packet else { return };
                let registered = client.0.registered.read().await;
                for bundle in registered.values() {
                    if let Err(e) = bundle.track.write_rtp(&packet).await {
                        log::debug!("dropping RTP packet for a closed destination: {e}");
                    }
                }
            }
        }
    }
}

async fn run_proximity_loop(client: ClientHandle, settings: Arc<Settings>) {
    log::info!("client {} proximity loop started", client.uuid());
    let mut interval = tokio::time::interval(settings.proximity_tick_interval());
    loop {
        tokio::select! {
            _ = client.0.stop_lac.notified() => {
                client.0.lac_stopped.notify_one();
                log::info!("client {} stopped proximity loop", client.uuid());
                return;
            }
            _ = interval.tick() => {
                evaluate_proximity(&client).await;
            }
        }
    }
}

async fn evaluate_proximity(client: &ClientHandle) {
    let peers = client.0.hub.snapshot_peers(client.uuid()).await;
    let self_location = client.current_location().await;
    for peer in peers {
        if !peer.has_peer_connection().await {
            continue;
        }
        let peer_location = peer.current_location().await;
        let in_range = crate::geo::within_range(self_location.as_ref(), peer_location.as_ref());
        let already_registered = client.has_registration(peer.uuid()).await;

        if already_registered {
            if !in_range {
                client.send(peer_status_envelope(false, peer.uuid()));
                registration::unregister(client, &peer).await;
            }
        } else if in_range {
            client.send(peer_status_envelope(true, peer.uuid()));
            registration::register(client, &peer).await;
        }
    }
}

/// Tears down everything tied to the peer connection: stops the proximity
/// and routing loops, removes every outbound registration this client
/// holds, and — to satisfy "no other client's registered map still
/// contains this client's UUID" — removes every *inbound* registration
/// other clients hold pointing at this one. The original's `handleDisconnect`
/// attempts only the first half, and with the wrong owner/key direction;
/// fixed here (see DESIGN.md).
///
/// Safe to call more than once and safe to call before a peer connection
/// ever existed (e.g. a client that disconnects before `wrtc_connect`).
pub(crate) async fn handle_disconnect(client: &ClientHandle) {
    if client.0.disconnect_started.swap(true, Ordering::SeqCst) {
        return;
    }

    client.0.stop_lac.notify_one();
    client.0.lac_stopped.notified().await;

    let mut pc_guard = client.0.peer_connection.write().await;
    client.0.stop_routing_audio.notify_one();

    let mine: Vec<(Uuid, AudioBundle)> = client.0.registered.write().await.drain().collect();
    for (dest_uuid, bundle) in mine {
        let dest_pc = match client.0.hub.get(dest_uuid).await {
            Some(dest) => dest.peer_connection().await,
            None => None,
        };
        registration::teardown_bundle(dest_pc.as_ref(), &bundle).await;
        client.send(remove_stream_envelope(dest_uuid));
    }

    for peer in client.0.hub.snapshot_peers(client.uuid()).await {
        if let Some(bundle) = peer.take_registration(client.uuid()).await {
            registration::teardown_bundle(pc_guard.as_ref(), &bundle).await;
            peer.send(remove_stream_envelope(client.uuid()));
        }
    }

    if let Some(pc) = pc_guard.take() {
        if let Err(e) = pc.close().await {
            log::error!("error closing peer connection for {}: {e}", client.uuid());
        }
    }
}

/// Unsubscribes from the hub, tells every remaining client this one is
/// gone, and closes the socket. Always runs `handle_disconnect` first so a
/// client that dies mid-call (socket error, not an explicit
/// `wrtc_disconnect`) still releases its peer connection and audio
/// registrations.
pub(crate) async fn shutdown_client(client: &ClientHandle) {
    if client.0.shutdown_started.swap(true, Ordering::SeqCst) {
        return;
    }
    log::info!("shutting down client {}", client.uuid());

    handle_disconnect(client).await;

    client.0.hub.unsubscribe(client.uuid()).await;

    let disconnected = Envelope::new("peer_disconnected", client.uuid().to_string())
        .expect("a uuid string always serializes to JSON");
    client.0.hub.broadcast_except(client.uuid(), disconnected).await;

    client.0.writer.close().await;
}

/// Test-only construction that bypasses the WebSocket upgrade entirely, so
/// the hub/registration/disconnect paths can be exercised directly: they
/// only ever touch `write_tx` and the registration/location/peer-connection
/// locks, never the real socket.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::socket::test_support::RecordingWriter;

    pub(crate) struct TestClient {
        pub handle: ClientHandle,
        pub writer: Arc<RecordingWriter>,
        pub outbox: mpsc::UnboundedReceiver<Envelope>,
    }

    pub(crate) fn spawn_test_client(ip_addr: &str, hub: HubHandle) -> TestClient {
        let writer = Arc::new(RecordingWriter::default());
        let (write_tx, outbox) = mpsc::unbounded_channel();

        let inner = Arc::new(ClientInner {
            uuid: Uuid::new_v4(),
            ip_addr: ip_addr.to_owned(),
            hub: hub.clone(),
            writer: writer.clone(),
            write_tx,
            peer_connection: RwLock::new(None),
            registered: RwLock::new(HashMap::new()),
            location: RwLock::new(None),
            avatar: RwLock::new(None),
            stop_lac: Notify::new(),
            lac_stopped: Notify::new(),
            stop_routing_audio: Notify::new(),
            disconnect_started: AtomicBool::new(false),
            shutdown_started: AtomicBool::new(false),
        });
        let handle = ClientHandle(inner);
        hub.subscribe(handle.clone());

        // `handle_disconnect` waits for an ack on `lac_stopped` the same
        // way it would from a live `run_proximity_loop`; stand in for that
        // task since tests never call `start_connected_loops`.
        tokio::spawn({
            let handle = handle.clone();
            async move {
                handle.0.stop_lac.notified().await;
                handle.0.lac_stopped.notify_one();
            }
        });

        TestClient {
            handle,
            writer,
            outbox,
        }
    }
}
