//! The two actor loops. Each actor owns its endpoint and blocks on it;
//! a poison payload ends the loop after the message in hand.

mod client;
mod server;

pub use client::ClientActor;
pub use server::ServerActor;

use cellsync_bus::Envelope;
use cellsync_common::Payload;

/// Wrap a payload for sending; the sender field is stamped by the endpoint.
fn envelope(payload: Payload, with_sizes: bool) -> Envelope<Payload> {
    Envelope {
        kind: payload.kind(),
        sender: 0,
        size: if with_sizes { payload.size_hint() } else { 0 },
        payload,
    }
}
