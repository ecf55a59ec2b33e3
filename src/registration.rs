//! The SFU's core track wiring: `register`/`unregister` open and close the
//! directed audio edges the proximity loop decides on (spec §4.H;
//! `original_source/modules/client_module.go::register/unregister`).
//!
//! A registration is stored on the *source* client, keyed by the
//! destination's UUID — `owner.registered[dest.uuid]` — because the
//! routing loop needs to iterate its own outbound edges without a
//! whole-hub scan per audio packet. The transceiver itself lives on the
//! destination's peer connection.

use std::sync::Arc;

use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::audio::AudioBundle;
use crate::client::ClientHandle;
use crate::codec::Envelope;

/// Adds a send-only transceiver carrying `owner`'s audio to `dest`'s peer
/// connection, then records the bundle under `owner`'s own registration
/// map. A no-op (logged, not fatal) if `dest` has no peer connection yet.
pub async fn register(owner: &ClientHandle, dest: &ClientHandle) {
    let Some(dest_pc) = dest.peer_connection().await else {
        log::error!(
            "cannot register {} -> {}: destination has no peer connection",
            owner.uuid(),
            dest.uuid()
        );
        return;
    };

    let track = Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            ..Default::default()
        },
        "sfu_audio".to_owned(),
        owner.uuid().to_string(),
    ));

    let init = [RTCRtpTransceiverInit {
        direction: RTCRtpTransceiverDirection::Sendonly,
        send_encodings: vec![],
    }];

    let transceiver = match dest_pc.add_transceiver_from_track(track.clone(), &init).await {
        Ok(t) => t,
        Err(e) => {
            log::error!(
                "failed to add transceiver for {} -> {}: {e}",
                owner.uuid(),
                dest.uuid()
            );
            return;
        }
    };

    owner
        .insert_registration(dest.uuid(), AudioBundle { transceiver, track })
        .await;
    log::info!("registered client {} to client {}", dest.uuid(), owner.uuid());
}

/// Removes `owner`'s registration for `dest`, tearing down the transceiver
/// on `dest`'s peer connection and notifying `owner`'s own socket so its
/// UI can drop the corresponding stream indicator.
pub async fn unregister(owner: &ClientHandle, dest: &ClientHandle) {
    let Some(bundle) = owner.take_registration(dest.uuid()).await else {
        log::error!(
            "unregister: no bundle registered for destination {} on client {}",
            dest.uuid(),
            owner.uuid()
        );
        return;
    };

    teardown_bundle(dest.peer_connection().await.as_ref(), &bundle).await;
    log::info!("unregistered client {} from client {}", dest.uuid(), owner.uuid());

    owner.send(
        Envelope::new("wrtc_remove_stream", dest.uuid().to_string())
            .expect("a uuid string always serializes to JSON"),
    );
}

/// Best-effort transceiver teardown shared by `unregister` and
/// `client::handle_disconnect`: removes the sender from `pc` (if still
/// open) and stops the transceiver. Errors are logged, never fatal — the
/// peer connection on the other side may already be closing.
pub(crate) async fn teardown_bundle(pc: Option<&Arc<RTCPeerConnection>>, bundle: &AudioBundle) {
    if let Some(pc) = pc {
        if let Some(sender) = bundle.transceiver.sender().await {
            if let Err(e) = pc.remove_track(&sender).await {
                log::error!("failed to remove track from peer connection: {e}");
            }
        }
    }
    if let Err(e) = bundle.transceiver.stop().await {
        log::error!("failed to stop transceiver: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::spawn_test_client;
    use crate::hub::HubHandle;
    use crate::signaling::build_api;
    use webrtc::peer_connection::configuration::RTCConfiguration;

    async fn client_with_peer_connection(ip_addr: &str, hub: HubHandle) -> crate::client::test_support::TestClient {
        let client = spawn_test_client(ip_addr, hub);
        let api = build_api().unwrap();
        let pc = Arc::new(api.new_peer_connection(RTCConfiguration::default()).await.unwrap());
        client.handle.set_peer_connection(pc).await;
        client
    }

    #[tokio::test]
    async fn register_adds_a_bundle_under_the_owner() {
        let hub = HubHandle::new();
        let owner = client_with_peer_connection("10.0.0.1", hub.clone()).await;
        let dest = client_with_peer_connection("10.0.0.2", hub.clone()).await;

        register(&owner.handle, &dest.handle).await;

        assert!(owner.handle.has_registration(dest.handle.uuid()).await);
        assert!(!dest.handle.has_registration(owner.handle.uuid()).await);
    }

    #[tokio::test]
    async fn unregister_clears_the_bundle_and_notifies_the_owner() {
        let hub = HubHandle::new();
        let mut owner = client_with_peer_connection("10.0.0.1", hub.clone()).await;
        let dest = client_with_peer_connection("10.0.0.2", hub.clone()).await;

        register(&owner.handle, &dest.handle).await;
        unregister(&owner.handle, &dest.handle).await;

        assert!(!owner.handle.has_registration(dest.handle.uuid()).await);
        let sent = owner.outbox.try_recv().unwrap();
        assert_eq!(sent.event, "wrtc_remove_stream");
    }

    #[tokio::test]
    async fn unregister_of_a_missing_pair_is_logged_not_fatal() {
        let hub = HubHandle::new();
        let owner = client_with_peer_connection("10.0.0.1", hub.clone()).await;
        let dest = client_with_peer_connection("10.0.0.2", hub.clone()).await;

        unregister(&owner.handle, &dest.handle).await;

        assert!(!owner.handle.has_registration(dest.handle.uuid()).await);
    }
}
