use std::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellId, IterationId, Value};

/// Reserved envelope kinds. Application kinds start at
/// [`REQUEST_KIND_BASE`]; responses follow at [`RESPONSE_KIND_BASE`].
pub const PING_KIND: u32 = 0;
pub const PONG_KIND: u32 = 1;
pub const TEXT_KIND: u32 = 2;
pub const POISON_KIND: u32 = 3;
pub const CONNECT_KIND: u32 = 4;
pub const REQUEST_KIND_BASE: u32 = 1024;
pub const RESPONSE_KIND_BASE: u32 = REQUEST_KIND_BASE + 1024;

/// A client request. Every variant piggy-backs the greatest iteration the
/// client has observed so far, so the server can advance its watermark and
/// slice the history accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Ask for a full state snapshot (plus any unseen deltas).
    LoadState { previous: IterationId },
    /// Set the value of an existing cell.
    UpdateValue {
        previous: IterationId,
        id: CellId,
        value: Value,
    },
    /// Create a new cell immediately after `near` (0 = at the head).
    InsertValue {
        previous: IterationId,
        near: CellId,
        value: Value,
    },
    /// Remove a cell from the sequence.
    DeleteValue { previous: IterationId, id: CellId },
    /// Fetch unseen deltas without mutating anything.
    Sync { previous: IterationId },
}

impl Request {
    pub fn previous_iteration(&self) -> IterationId {
        match *self {
            Request::LoadState { previous }
            | Request::UpdateValue { previous, .. }
            | Request::InsertValue { previous, .. }
            | Request::DeleteValue { previous, .. }
            | Request::Sync { previous } => previous,
        }
    }

    /// Whether this request may advance the server's iteration.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Request::UpdateValue { .. } | Request::InsertValue { .. } | Request::DeleteValue { .. }
        )
    }

    pub fn kind(&self) -> u32 {
        REQUEST_KIND_BASE
            + match self {
                Request::LoadState { .. } => 0,
                Request::UpdateValue { .. } => 1,
                Request::InsertValue { .. } => 2,
                Request::DeleteValue { .. } => 3,
                Request::Sync { .. } => 4,
            }
    }

    pub fn size_hint(&self) -> u64 {
        size_of::<Request>() as u64
    }
}

/// An insert delta: `cell` goes immediately after `near` (0 = head).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insertion {
    pub near: CellId,
    pub cell: Cell,
}

/// The deltas a client has not observed yet, split into three ordered
/// streams. Clients must apply inserts first, then updates, then deletes:
/// that makes inserts anchored at cells deleted in the same batch land
/// correctly, and lets updates hit cells inserted by the same batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaBatch {
    /// The server iteration this batch brings the client up to.
    pub iteration: IterationId,
    pub updates: Vec<Cell>,
    pub inserts: Vec<Insertion>,
    pub deletes: Vec<CellId>,
}

impl DeltaBatch {
    /// An empty batch standing at `iteration`.
    pub fn at(iteration: IterationId) -> Self {
        DeltaBatch {
            iteration,
            ..DeltaBatch::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty() && self.deletes.is_empty()
    }

    pub fn size_hint(&self) -> u64 {
        (size_of::<IterationId>()
            + self.updates.len() * size_of::<Cell>()
            + self.inserts.len() * size_of::<Insertion>()
            + self.deletes.len() * size_of::<CellId>()) as u64
    }
}

/// A server response. Every variant embeds the [`DeltaBatch`] the caller
/// was behind on; `State` additionally carries a full snapshot and
/// `InsertValue` echoes the freshly minted cell id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    State { cells: Vec<Cell>, deltas: DeltaBatch },
    UpdateValue { deltas: DeltaBatch },
    InsertValue { new_id: CellId, deltas: DeltaBatch },
    DeleteValue { deltas: DeltaBatch },
    Sync { deltas: DeltaBatch },
}

impl Response {
    pub fn deltas(&self) -> &DeltaBatch {
        match self {
            Response::State { deltas, .. }
            | Response::UpdateValue { deltas }
            | Response::InsertValue { deltas, .. }
            | Response::DeleteValue { deltas }
            | Response::Sync { deltas } => deltas,
        }
    }

    /// The iteration the response brings the caller up to.
    pub fn iteration(&self) -> IterationId {
        self.deltas().iteration
    }

    pub fn kind(&self) -> u32 {
        RESPONSE_KIND_BASE
            + match self {
                Response::State { .. } => 0,
                Response::UpdateValue { .. } => 1,
                Response::InsertValue { .. } => 2,
                Response::DeleteValue { .. } => 3,
                Response::Sync { .. } => 4,
            }
    }

    pub fn size_hint(&self) -> u64 {
        let extra = match self {
            Response::State { cells, .. } => cells.len() * size_of::<Cell>(),
            Response::InsertValue { .. } => size_of::<CellId>(),
            _ => 0,
        };
        self.deltas().size_hint() + extra as u64
    }
}

/// Everything that can travel through a bus mailbox.
///
/// `Ping`/`Pong`/`Text` are plumbing left over from bus bring-up and
/// connection acknowledgement; `Poison` terminates a receive loop;
/// `Connect` registers a client's watermark before its first request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Ping,
    Pong,
    Text(String),
    Poison,
    Connect,
    Request(Request),
    Response(Response),
}

impl Payload {
    pub fn kind(&self) -> u32 {
        match self {
            Payload::Ping => PING_KIND,
            Payload::Pong => PONG_KIND,
            Payload::Text(_) => TEXT_KIND,
            Payload::Poison => POISON_KIND,
            Payload::Connect => CONNECT_KIND,
            Payload::Request(req) => req.kind(),
            Payload::Response(resp) => resp.kind(),
        }
    }

    /// Approximate in-memory size, for transfer statistics only.
    pub fn size_hint(&self) -> u64 {
        match self {
            Payload::Text(s) => s.len() as u64,
            Payload::Request(req) => req.size_hint(),
            Payload::Response(resp) => resp.size_hint(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kinds_start_at_the_application_base() {
        let req = Request::LoadState { previous: 0 };
        assert_eq!(req.kind(), REQUEST_KIND_BASE);
        assert_eq!(Payload::Request(req).kind(), REQUEST_KIND_BASE);
        assert_eq!(Payload::Connect.kind(), CONNECT_KIND);
    }

    #[test]
    fn response_iteration_comes_from_the_embedded_batch() {
        let resp = Response::Sync {
            deltas: DeltaBatch::at(17),
        };
        assert_eq!(resp.iteration(), 17);
        assert!(resp.deltas().is_empty());
    }
}
