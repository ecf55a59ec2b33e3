//! Minimal selective-forwarding voice/location server: every connected
//! client gets a WebSocket signaling channel and, once it opens a peer
//! connection, audio is forwarded (never mixed or transcoded) to whichever
//! other clients the proximity loop has decided are in range.

pub mod audio;
pub mod client;
pub mod codec;
pub mod config;
pub mod geo;
pub mod hub;
pub mod registration;
pub mod server;
pub mod signaling;
pub mod socket;
