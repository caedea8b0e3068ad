//! Wires the cellsync pieces into a runnable system: one server actor, N
//! client actors, one thread each, all talking through the in-process bus.
//! The harness seeds the server, lets the actors run for a configured
//! duration, poisons everyone and reports per-client transfer statistics.

pub mod actors;
pub mod stats;

use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use cellsync_bus::{Bus, Endpoint};
use cellsync_client::{Replica, TreapStore};
use cellsync_common::{Cell, Payload, Settings, SERVER_MAILBOX};

use actors::{ClientActor, ServerActor};
use stats::TransferStats;

/// Run the whole harness to completion. Returns the per-client statistics;
/// fails if any client diverged or a thread came down.
pub fn run(settings: Settings) -> anyhow::Result<Vec<TransferStats>> {
    let mut rng = match settings.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };

    // Mailbox 0 is the server, 1..=N the clients, N+1 the harness itself.
    let bus = Bus::new(settings.clients as usize + 2);
    let harness = Endpoint::new(Arc::clone(&bus), settings.clients as u64 + 1);

    let cells: Vec<Cell> = (1..=settings.initial_cells)
        .map(|id| Cell::new(id, rng.random()))
        .collect();
    let server = ServerActor::new(
        Endpoint::new(Arc::clone(&bus), SERVER_MAILBOX),
        cells,
        &settings,
    );
    let server_thread = thread::Builder::new()
        .name("server".into())
        .spawn(move || server.run())
        .context("spawning the server thread")?;

    let mut client_threads = Vec::new();
    for id in 1..=settings.clients {
        let client = ClientActor::new(
            Endpoint::new(Arc::clone(&bus), id as u64),
            id,
            Replica::new(TreapStore::new()),
            SmallRng::seed_from_u64(rng.random()),
            settings.clone(),
        );
        let thread = thread::Builder::new()
            .name(format!("client-{id}"))
            .spawn(move || client.run())
            .context("spawning a client thread")?;
        client_threads.push(thread);
    }

    info!(duration = ?settings.run_for, "harness sleeping while the actors work");
    thread::sleep(settings.run_for);

    info!("poisoning the actors");
    poison(&harness, SERVER_MAILBOX)?;
    for id in 1..=settings.clients {
        poison(&harness, id as u64)?;
    }

    if server_thread.join().is_err() {
        bail!("the server thread panicked");
    }
    let mut collected = Vec::new();
    let mut diverged = 0u32;
    for thread in client_threads {
        match thread.join() {
            Ok(Ok(stats)) => collected.push(stats),
            Ok(Err(error)) => {
                tracing::error!(%error, "client ended in divergence");
                diverged += 1;
            }
            Err(_) => bail!("a client thread panicked"),
        }
    }
    if diverged > 0 {
        bail!("{diverged} client(s) diverged from the server state");
    }
    Ok(collected)
}

fn poison(harness: &Endpoint<Payload>, mailbox: u64) -> anyhow::Result<()> {
    harness
        .send(
            mailbox,
            cellsync_bus::Envelope {
                kind: Payload::Poison.kind(),
                sender: 0,
                size: 0,
                payload: Payload::Poison,
            },
        )
        .with_context(|| format!("poisoning mailbox {mailbox}"))
}
