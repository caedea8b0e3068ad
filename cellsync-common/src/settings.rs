use std::time::Duration;

/// Immutable runtime configuration, built once by the harness and passed by
/// value into every actor constructor.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Number of client actors.
    pub clients: u32,
    /// Number of cells the server is seeded with.
    pub initial_cells: u64,
    /// How long the harness lets the actors run before poisoning them.
    pub run_for: Duration,
    /// Client pause between a handled response and the next request.
    pub think_time: Duration,
    /// Whether clients include LoadState in their random request mix.
    /// The very first request of a client is always LoadState.
    pub send_load_state: bool,
    /// Whether clients include Sync in their random request mix.
    pub send_sync: bool,
    /// Verify every snapshot against the local replica; divergence is fatal.
    pub check_state: bool,
    /// Let the server answer mutating requests without deltas; clients
    /// catch up on their next Sync or LoadState.
    pub delayed_history: bool,
    /// Populate envelope size fields for the transfer statistics.
    pub message_sizes: bool,
    /// Seed for all randomness; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            clients: 4,
            initial_cells: 100,
            run_for: Duration::from_secs(5),
            think_time: Duration::from_millis(200),
            send_load_state: false,
            send_sync: true,
            check_state: false,
            delayed_history: false,
            message_sizes: true,
            seed: None,
        }
    }
}
