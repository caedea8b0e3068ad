//! Shared artifacts for the cellsync workspace: the cell data model, the
//! request/response API spoken over the bus, and the runtime settings record
//! handed to every actor.

mod api;
mod cell;
mod settings;

pub use api::{
    DeltaBatch, Insertion, Payload, Request, Response, CONNECT_KIND, PING_KIND, POISON_KIND,
    PONG_KIND, REQUEST_KIND_BASE, RESPONSE_KIND_BASE, TEXT_KIND,
};
pub use cell::{Cell, CellId, ClientId, IterationId, Modification, Value, HEAD_CELL_ID};
pub use settings::Settings;

/// Mailbox of the server actor. Clients occupy mailboxes `1..=N`.
pub const SERVER_MAILBOX: u64 = 0;
