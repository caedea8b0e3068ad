use tracing::{debug, info, warn};

use cellsync_bus::Endpoint;
use cellsync_common::{Cell, ClientId, Payload, Settings};
use cellsync_server::{ServerService, Service};

use super::envelope;

/// Owns the service answering requests (normally the real replication
/// engine); they are serialized through its mailbox, so the service itself
/// needs no locking.
pub struct ServerActor<D = ServerService> {
    endpoint: Endpoint<Payload>,
    service: D,
    message_sizes: bool,
}

impl ServerActor<ServerService> {
    pub fn new(endpoint: Endpoint<Payload>, cells: Vec<Cell>, settings: &Settings) -> Self {
        ServerActor::over(endpoint, ServerService::new(cells, settings), settings)
    }
}

impl<D: Service> ServerActor<D> {
    /// Run the actor loop over any service, e.g. a nop one for bus tests.
    pub fn over(endpoint: Endpoint<Payload>, service: D, settings: &Settings) -> Self {
        ServerActor {
            endpoint,
            service,
            message_sizes: settings.message_sizes,
        }
    }

    pub fn run(mut self) {
        info!("server actor up");
        loop {
            let received = self.endpoint.recv();
            let client = received.sender as ClientId;
            match received.payload {
                Payload::Poison => {
                    info!(iteration = self.service.iteration(), "server actor poisoned");
                    break;
                }
                Payload::Connect => {
                    debug!(client, "client connected");
                    self.service.connect(client);
                }
                Payload::Ping => self.reply(received.sender, Payload::Pong),
                Payload::Request(request) => {
                    let response = self.service.handle(client, request);
                    self.reply(received.sender, Payload::Response(response));
                }
                other => warn!(kind = other.kind(), "server ignoring unexpected payload"),
            }
        }
    }

    fn reply(&self, to: u64, payload: Payload) {
        if let Err(error) = self.endpoint.send(to, envelope(payload, self.message_sizes)) {
            warn!(%error, "dropping reply");
        }
    }
}
