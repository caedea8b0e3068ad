use std::thread;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::Rng;
use tracing::{debug, error, info, warn};

use cellsync_bus::Endpoint;
use cellsync_client::{CellStore, DivergedError, Replica};
use cellsync_common::{ClientId, Payload, Request, Settings, SERVER_MAILBOX};

use crate::stats::TransferStats;

use super::envelope;

#[derive(Debug, Clone, Copy)]
enum RequestKind {
    LoadState,
    Update,
    Insert,
    Delete,
    Sync,
}

/// Fires randomized requests at the server, one at a time, applying each
/// response to its replica before thinking about the next.
pub struct ClientActor<S> {
    endpoint: Endpoint<Payload>,
    id: ClientId,
    replica: Replica<S>,
    rng: SmallRng,
    settings: Settings,
    /// The request kinds this client may roll; see [`Settings`].
    mix: Vec<RequestKind>,
}

impl<S: CellStore> ClientActor<S> {
    pub fn new(
        endpoint: Endpoint<Payload>,
        id: ClientId,
        replica: Replica<S>,
        rng: SmallRng,
        settings: Settings,
    ) -> Self {
        let mut mix = Vec::new();
        if settings.send_load_state {
            mix.push(RequestKind::LoadState);
        }
        mix.extend([RequestKind::Update, RequestKind::Insert, RequestKind::Delete]);
        if settings.send_sync {
            mix.push(RequestKind::Sync);
        }
        ClientActor {
            endpoint,
            id,
            replica,
            rng,
            settings,
            mix,
        }
    }

    /// Run until poisoned. `Err` means the replica diverged from a checked
    /// snapshot, which is a bug worth failing the whole run over.
    pub fn run(mut self) -> Result<TransferStats, DivergedError> {
        info!(client = self.id, "client actor up");
        let mut stats = TransferStats {
            client: self.id,
            ..TransferStats::default()
        };

        self.send(Payload::Connect, &mut stats);
        let started = Instant::now();

        for round in 0u64.. {
            let request = self.next_request(round);
            debug!(client = self.id, ?request, round, "requesting");
            self.send(Payload::Request(request), &mut stats);

            let waiting = Instant::now();
            let received = self.endpoint.recv();
            let waited = waiting.elapsed();
            stats.wait_time += waited;
            stats.received_bytes += received.size;
            match received.payload {
                Payload::Poison => {
                    info!(client = self.id, round, "client actor poisoned");
                    break;
                }
                Payload::Response(response) => {
                    let handling = Instant::now();
                    if let Err(diverged) =
                        self.replica.apply_response(&response, self.settings.check_state)
                    {
                        error!(client = self.id, %diverged, "replica diverged, aborting");
                        return Err(diverged);
                    }
                    let handled = handling.elapsed();
                    stats.handle_time += handled;
                    stats.round_trips += 1;
                    debug!(
                        client = self.id,
                        round,
                        waited_us = waited.as_micros() as u64,
                        handled_us = handled.as_micros() as u64,
                        "response applied"
                    );
                }
                other => warn!(
                    client = self.id,
                    kind = other.kind(),
                    "client ignoring unexpected payload"
                ),
            }
            thread::sleep(self.settings.think_time);
        }

        stats.work_time = started.elapsed();
        Ok(stats)
    }

    /// The opening request is always a state load; after that the enabled
    /// kinds are rolled uniformly. Picks needing a live cell fall back to
    /// a sync while the replica is empty.
    fn next_request(&mut self, round: u64) -> Request {
        let previous = self.replica.iteration();
        if round == 0 {
            return Request::LoadState { previous };
        }
        let kind = self.mix[self.rng.random_range(0..self.mix.len())];
        match kind {
            RequestKind::LoadState => Request::LoadState { previous },
            RequestKind::Update => self
                .replica
                .pick_update(&mut self.rng)
                .map(|(id, value)| Request::UpdateValue {
                    previous,
                    id,
                    value,
                })
                .unwrap_or(Request::Sync { previous }),
            RequestKind::Insert => Request::InsertValue {
                previous,
                near: self.replica.pick_insert_anchor(&mut self.rng),
                value: self.rng.random(),
            },
            RequestKind::Delete => self
                .replica
                .pick_delete(&mut self.rng)
                .map(|id| Request::DeleteValue { previous, id })
                .unwrap_or(Request::Sync { previous }),
            RequestKind::Sync => Request::Sync { previous },
        }
    }

    fn send(&self, payload: Payload, stats: &mut TransferStats) {
        let envelope = envelope(payload, self.settings.message_sizes);
        stats.sent_bytes += envelope.size;
        if let Err(error) = self.endpoint.send(SERVER_MAILBOX, envelope) {
            warn!(client = self.id, %error, "send failed");
        }
    }
}
