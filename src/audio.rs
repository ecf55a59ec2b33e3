//! `AudioBundle`: the transceiver + local track pair representing one
//! directed audio edge from a source client to a destination peer
//! connection (spec §3, §4.C).

use std::sync::Arc;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

/// Created by `register(src, dst)`, destroyed by `unregister(src, dst)`.
///
/// The transceiver lives on the *destination*'s peer connection; the
/// track is the local sink that the source's routing loop writes RTP
/// packets into.
#[derive(Clone)]
pub struct AudioBundle {
    pub transceiver: Arc<RTCRtpTransceiver>,
    pub track: Arc<TrackLocalStaticRTP>,
}
