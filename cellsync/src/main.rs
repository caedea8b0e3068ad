use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cellsync_common::Settings;

/// An in-memory ordered-list replication service: one authoritative
/// server, N randomized clients, incremental delta propagation.
#[derive(Debug, Parser)]
#[command(name = "cellsync", version, about)]
struct Options {
    /// Number of client actors.
    #[arg(long, default_value_t = 4, env = "CELLSYNC_CLIENTS")]
    clients: u32,

    /// Number of cells the server starts with.
    #[arg(long, default_value_t = 100, env = "CELLSYNC_CELLS")]
    cells: u64,

    /// How long to let the actors run, in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "CELLSYNC_RUN_FOR_MS")]
    run_for_ms: u64,

    /// Client pause between responses, in milliseconds.
    #[arg(long, default_value_t = 200, env = "CELLSYNC_THINK_TIME_MS")]
    think_time_ms: u64,

    /// Let clients roll LoadState requests in their mix (the first request
    /// is one regardless).
    #[arg(long, env = "CELLSYNC_SEND_LOAD_STATE")]
    send_load_state: bool,

    /// Take Sync requests out of the client mix.
    #[arg(long, env = "CELLSYNC_SKIP_SYNC")]
    skip_sync: bool,

    /// Verify every snapshot cell-by-cell against the local replica;
    /// divergence fails the run.
    #[arg(long, env = "CELLSYNC_CHECK_STATE")]
    check_state: bool,

    /// Answer mutating requests without deltas; clients catch up on Sync.
    #[arg(long, env = "CELLSYNC_DELAYED_HISTORY")]
    delayed_history: bool,

    /// Skip populating the envelope size fields.
    #[arg(long, env = "CELLSYNC_SKIP_MESSAGE_SIZES")]
    skip_message_sizes: bool,

    /// Seed for all randomness; omit to seed from the OS.
    #[arg(long, env = "CELLSYNC_SEED")]
    seed: Option<u64>,
}

impl Options {
    fn settings(&self) -> Settings {
        Settings {
            clients: self.clients,
            initial_cells: self.cells,
            run_for: Duration::from_millis(self.run_for_ms),
            think_time: Duration::from_millis(self.think_time_ms),
            send_load_state: self.send_load_state,
            send_sync: !self.skip_sync,
            check_state: self.check_state,
            delayed_history: self.delayed_history,
            message_sizes: !self.skip_message_sizes,
            seed: self.seed,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let options = Options::parse();
    let stats = cellsync::run(options.settings())?;
    for entry in stats {
        println!("{entry}");
    }
    Ok(())
}
