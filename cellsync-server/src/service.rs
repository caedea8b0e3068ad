//! Request dispatch: one request at a time, fully serialized.
//!
//! Per request: apply the mutation (which may be a no-op), build the
//! response extras, advance the caller's watermark from the iteration it
//! piggy-backed, attach the deltas it has not seen, then compact. The
//! server never fails a request at the protocol level; every problem
//! degrades to a no-op or an empty delta set that prompts a reload.

use tracing::{debug, instrument, trace};

use cellsync_common::{
    Cell, CellId, ClientId, DeltaBatch, IterationId, Modification, Request, Response, Settings,
};

use crate::history::HistoryLog;
use crate::sequence::Sequence;

/// What a server actor needs from the thing answering requests. The real
/// engine is [`ServerService`]; [`NopService`] answers without any state,
/// which is all a bus bring-up or throughput measurement needs.
pub trait Service {
    fn connect(&mut self, client: ClientId);

    fn handle(&mut self, client: ClientId, request: Request) -> Response;

    fn iteration(&self) -> IterationId;
}

/// Answers every request with an empty response and never advances the
/// timeline.
#[derive(Debug, Default)]
pub struct NopService;

impl Service for NopService {
    fn connect(&mut self, _client: ClientId) {}

    fn handle(&mut self, _client: ClientId, request: Request) -> Response {
        let deltas = DeltaBatch::default();
        match request {
            Request::LoadState { .. } => Response::State {
                cells: Vec::new(),
                deltas,
            },
            Request::UpdateValue { .. } => Response::UpdateValue { deltas },
            Request::InsertValue { .. } => Response::InsertValue { new_id: 0, deltas },
            Request::DeleteValue { .. } => Response::DeleteValue { deltas },
            Request::Sync { .. } => Response::Sync { deltas },
        }
    }

    fn iteration(&self) -> IterationId {
        0
    }
}

/// The server-side replication engine behind one mailbox.
pub struct ServerService {
    sequence: Sequence,
    history: HistoryLog,
    /// Answer mutating requests without deltas; callers catch up on their
    /// next Sync or LoadState.
    delayed_history: bool,
}

impl ServerService {
    pub fn new(cells: Vec<Cell>, settings: &Settings) -> Self {
        debug!(cells = cells.len(), "server state seeded");
        ServerService {
            sequence: Sequence::new(cells),
            history: HistoryLog::new(),
            delayed_history: settings.delayed_history,
        }
    }

    /// Current live cells; what LoadState returns.
    pub fn snapshot(&self) -> Vec<Cell> {
        self.sequence.snapshot()
    }

    /// Number of history entries awaiting compaction.
    pub fn retained_history(&self) -> usize {
        self.history.retained()
    }

    /// Nodes still allocated in the sequence arena (sentinel included).
    pub fn allocated_nodes(&self) -> usize {
        self.sequence.allocated()
    }
}

impl Service for ServerService {
    fn iteration(&self) -> IterationId {
        self.history.iteration()
    }

    /// First contact: pin the client's watermark at 0 so compaction waits
    /// for it until it has loaded state.
    fn connect(&mut self, client: ClientId) {
        self.history.register(client);
    }

    /// Apply one request and produce its response.
    #[instrument(level = "debug", skip(self), fields(iteration = self.history.iteration()))]
    fn handle(&mut self, client: ClientId, request: Request) -> Response {
        let previous = request.previous_iteration();

        let build = match request {
            Request::UpdateValue { id, value, .. } => {
                if self.sequence.update(id, value) {
                    self.history.record(
                        Modification::Update {
                            cell: Cell::new(id, value),
                        },
                        &mut self.sequence,
                    );
                } else {
                    trace!(id, "update was a no-op");
                }
                ResponseBuild::UpdateValue
            }
            Request::InsertValue { near, value, .. } => {
                let (new_id, anchor) = self.sequence.insert_after(near, value);
                self.history.record(
                    Modification::Insert {
                        near: anchor,
                        cell: Cell::new(new_id, value),
                    },
                    &mut self.sequence,
                );
                ResponseBuild::InsertValue { new_id }
            }
            Request::DeleteValue { id, .. } => {
                if self.sequence.delete(id) {
                    self.history
                        .record(Modification::Delete { id }, &mut self.sequence);
                } else {
                    trace!(id, "delete was a no-op");
                }
                ResponseBuild::DeleteValue
            }
            // The snapshot is taken after the (non-)mutation above, so a
            // reload always observes the caller's own latest write.
            Request::LoadState { .. } => ResponseBuild::State {
                cells: self.sequence.snapshot(),
            },
            Request::Sync { .. } => ResponseBuild::Sync,
        };

        self.history.advance(client, previous);

        let deltas = if self.delayed_history && request.is_mutation() {
            // Deferred: the caller learns nothing new now and must Sync
            // eventually; its watermark above stays at `previous`, so the
            // batch it skipped here is shipped whole on that Sync.
            DeltaBatch::at(previous)
        } else {
            self.history.deltas_for(client, &self.sequence)
        };

        let response = match build {
            ResponseBuild::State { cells } => Response::State { cells, deltas },
            ResponseBuild::UpdateValue => Response::UpdateValue { deltas },
            ResponseBuild::InsertValue { new_id } => Response::InsertValue { new_id, deltas },
            ResponseBuild::DeleteValue => Response::DeleteValue { deltas },
            ResponseBuild::Sync => Response::Sync { deltas },
        };

        self.history.compact(&mut self.sequence);
        response
    }
}

enum ResponseBuild {
    State { cells: Vec<Cell> },
    UpdateValue,
    InsertValue { new_id: CellId },
    DeleteValue,
    Sync,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn service(cells: &[(u64, u32)]) -> ServerService {
        let cells = cells.iter().map(|&(id, value)| Cell::new(id, value)).collect();
        ServerService::new(cells, &Settings::default())
    }

    #[test]
    fn a_mutating_response_carries_the_callers_own_delta() {
        let mut server = service(&[(1, 10)]);
        server.connect(1);
        let response = server.handle(
            1,
            Request::UpdateValue {
                previous: 0,
                id: 1,
                value: 42,
            },
        );
        let Response::UpdateValue { deltas } = response else {
            panic!("wrong response variant");
        };
        assert_eq!(deltas.iteration, 1);
        assert_eq!(deltas.updates, vec![Cell::new(1, 42)]);
    }

    #[test]
    fn tombstoned_targets_do_not_advance_the_iteration() {
        let mut server = service(&[(1, 10), (2, 20)]);
        server.connect(1);
        server.handle(
            1,
            Request::DeleteValue {
                previous: 0,
                id: 2,
            },
        );
        assert_eq!(server.iteration(), 1);
        let response = server.handle(
            1,
            Request::UpdateValue {
                previous: 1,
                id: 2,
                value: 99,
            },
        );
        assert_eq!(server.iteration(), 1);
        assert!(response.deltas().is_empty());
        let response = server.handle(
            1,
            Request::DeleteValue {
                previous: 1,
                id: 2,
            },
        );
        assert_eq!(server.iteration(), 1);
        assert!(response.deltas().is_empty());
    }

    #[test]
    fn the_nop_service_answers_in_kind_and_stands_still() {
        let mut server = NopService;
        server.connect(1);
        let response = server.handle(
            1,
            Request::InsertValue {
                previous: 9,
                near: 3,
                value: 7,
            },
        );
        assert_eq!(
            response,
            Response::InsertValue {
                new_id: 0,
                deltas: DeltaBatch::default(),
            },
        );
        assert_eq!(server.iteration(), 0);
    }

    #[test]
    fn delayed_history_echoes_the_callers_iteration() {
        let settings = Settings {
            delayed_history: true,
            ..Settings::default()
        };
        let mut server = ServerService::new(vec![Cell::new(1, 10)], &settings);
        server.connect(1);
        let response = server.handle(
            1,
            Request::UpdateValue {
                previous: 0,
                id: 1,
                value: 42,
            },
        );
        assert!(response.deltas().is_empty());
        assert_eq!(response.iteration(), 0);
        // The skipped batch arrives whole on the next sync.
        let response = server.handle(1, Request::Sync { previous: 0 });
        assert_eq!(response.iteration(), 1);
        assert_eq!(response.deltas().updates, vec![Cell::new(1, 42)]);
    }
}
