//! Peer-connection lifecycle and the SDP/ICE state machine (spec §4.G;
//! `original_source/modules/webrtc_module.go`).
//!
//! Glare handling: the original applies a local rollback description and
//! then calls `SetRemoteDescription` *twice* — once inside the rollback
//! branch, once unconditionally right after. Replicating that would apply
//! the incoming offer to the remote description twice per renegotiation.
//! Here a non-stable signaling state triggers the rollback, and the remote
//! offer is applied exactly once afterward (spec §9 resolves this as an
//! Open Question; see DESIGN.md).

use std::sync::Arc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::client::{self, ClientHandle};
use crate::codec::Envelope;
use crate::config::Settings;

pub(crate) fn build_api() -> anyhow::Result<API> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media)?;

    Ok(APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build())
}

fn build_configuration(settings: &Settings) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: settings.stun_servers.clone(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Creates the peer connection for a client, wires every event handler,
/// and starts the audio routing and proximity loops. Triggered by
/// `wrtc_connect`, and defensively reused by `handle_offer` when an offer
/// arrives on a client that never sent one.
pub async fn create_peer_connection(client: ClientHandle, settings: Arc<Settings>) {
    if client.has_peer_connection().await {
        log::warn!("client {} already has a peer connection, ignoring wrtc_connect", client.uuid());
        return;
    }

    let api = match build_api() {
        Ok(api) => api,
        Err(e) => {
            log::error!("failed to build webrtc API for {}: {e}", client.uuid());
            return;
        }
    };

    let pc = match api.new_peer_connection(build_configuration(&settings)).await {
        Ok(pc) => Arc::new(pc),
        Err(e) => {
            log::error!("failed to create peer connection for {}: {e}", client.uuid());
            return;
        }
    };

    wire_handlers(&client, &pc).await;

    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(1500);
    let track_client = client.clone();
    pc.on_track(Box::new(move |track, _receiver| {
        let inbound_tx = inbound_tx.clone();
        let uuid = track_client.uuid();
        Box::pin(async move {
            let Some(track) = track else { return };
            loop {
                match track.read_rtp().await {
                    Ok((packet, _attributes)) => {
                        if inbound_tx.send(packet).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        log::debug!("inbound track for {uuid} ended: {e}");
                        return;
                    }
                }
            }
        })
    }))
    .await;

    client.set_peer_connection(pc).await;
    client::start_connected_loops(client.clone(), inbound_rx, settings);
    log::info!("peer connection created for client {}", client.uuid());
}

async fn wire_handlers(client: &ClientHandle, pc: &Arc<RTCPeerConnection>) {
    let negotiation_client = client.clone();
    let negotiation_pc = pc.clone();
    pc.on_negotiation_needed(Box::new(move || {
        let client = negotiation_client.clone();
        let pc = negotiation_pc.clone();
        Box::pin(async move {
            if pc.signaling_state() != RTCSignalingState::Stable {
                log::info!("blocked renegotiation for {} due to a pending offer", client.uuid());
                return;
            }
            let offer = match pc.create_offer(None).await {
                Ok(o) => o,
                Err(e) => {
                    log::error!("failed to create renegotiation offer for {}: {e}", client.uuid());
                    return;
                }
            };
            if let Err(e) = pc.set_local_description(offer.clone()).await {
                log::error!("failed to set local description for {}: {e}", client.uuid());
                return;
            }
            send_session_description(&client, "wrtc_renegotiation_needed", &offer);
        })
    }))
    .await;

    let candidate_client = client.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let client = candidate_client.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else { return };
            match candidate.to_json().await {
                Ok(init) => send_json(&client, "wrtc_candidate", &init),
                Err(e) => log::error!("failed to encode ICE candidate for {}: {e}", client.uuid()),
            }
        })
    }))
    .await;

    let ice_state_client = client.clone();
    let ice_state_pc = pc.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let client = ice_state_client.clone();
        let pc = ice_state_pc.clone();
        Box::pin(async move {
            if state == RTCIceConnectionState::Failed {
                client.send(Envelope::empty("wrtc_failed"));
                if let Err(e) = pc.close().await {
                    log::error!("error closing peer connection for {}: {e}", client.uuid());
                }
                log::info!("peer connection state failed for {}, handling disconnect", client.uuid());
                client::handle_disconnect(&client).await;
            }
        })
    }))
    .await;
}

fn send_session_description(client: &ClientHandle, event: &str, desc: &RTCSessionDescription) {
    send_json(client, event, desc);
}

fn send_json(client: &ClientHandle, event: &str, value: &impl serde::Serialize) {
    match Envelope::new(event, value) {
        Ok(envelope) => client.send(envelope),
        Err(e) => log::error!("failed to encode {event} payload for {}: {e}", client.uuid()),
    }
}

/// A client may send `wrtc_offer` without ever having sent `wrtc_connect`;
/// `create_peer_connection` is idempotent so this just builds the
/// connection lazily rather than requiring a strict event ordering.
pub async fn handle_offer(client: &ClientHandle, settings: Arc<Settings>, offer: RTCSessionDescription) {
    if !client.has_peer_connection().await {
        create_peer_connection(client.clone(), settings).await;
    }
    let Some(pc) = client.peer_connection().await else {
        log::error!("no peer connection available to handle offer from {}", client.uuid());
        return;
    };

    if let Err(e) = pc.set_remote_description(offer).await {
        log::error!("failed to set remote description for {}: {e}", client.uuid());
        return;
    }

    answer(client, &pc).await;
}

pub async fn handle_renegotiation(client: &ClientHandle, offer: RTCSessionDescription) {
    let Some(pc) = client.peer_connection().await else {
        log::error!("no peer connection available for renegotiation from {}", client.uuid());
        return;
    };

    if pc.signaling_state() != RTCSignalingState::Stable {
        let rollback = RTCSessionDescription {
            sdp_type: RTCSdpType::Rollback,
            ..Default::default()
        };
        if let Err(e) = pc.set_local_description(rollback).await {
            log::error!("failed to roll back local description for {}: {e}", client.uuid());
            return;
        }
    }

    if let Err(e) = pc.set_remote_description(offer).await {
        log::error!("failed to set remote description during renegotiation for {}: {e}", client.uuid());
        return;
    }

    answer(client, &pc).await;
}

async fn answer(client: &ClientHandle, pc: &Arc<RTCPeerConnection>) {
    let answer = match pc.create_answer(None).await {
        Ok(a) => a,
        Err(e) => {
            log::error!("failed to create answer for {}: {e}", client.uuid());
            return;
        }
    };
    if let Err(e) = pc.set_local_description(answer.clone()).await {
        log::error!("failed to set local description for {}: {e}", client.uuid());
        return;
    }
    send_session_description(client, "wrtc_answer", &answer);
}

pub async fn handle_answer(client: &ClientHandle, answer: RTCSessionDescription) {
    let Some(pc) = client.peer_connection().await else {
        log::error!("no peer connection available to handle answer from {}", client.uuid());
        return;
    };
    if let Err(e) = pc.set_remote_description(answer).await {
        log::error!("failed to set remote description for {}: {e}", client.uuid());
    }
}

pub async fn handle_ice_candidate(client: &ClientHandle, candidate: RTCIceCandidateInit) {
    let Some(pc) = client.peer_connection().await else {
        log::error!("no peer connection available to add ICE candidate for {}", client.uuid());
        return;
    };
    if let Err(e) = pc.add_ice_candidate(candidate).await {
        log::error!("failed to add ICE candidate for {}: {e}", client.uuid());
    }
}
