use std::fmt;
use std::time::Duration;

use cellsync_common::ClientId;

/// What a client actor hands back when it is poisoned.
#[derive(Debug, Default, Clone)]
pub struct TransferStats {
    pub client: ClientId,
    pub sent_bytes: u64,
    pub received_bytes: u64,
    pub round_trips: u64,
    pub work_time: Duration,
    /// Total time spent blocked on the mailbox waiting for responses.
    pub wait_time: Duration,
    /// Total time spent applying responses to the replica.
    pub handle_time: Duration,
}

/// Render a byte count the way humans read them.
pub fn pretty_bytes(bytes: f64) -> String {
    if bytes > 1e9 {
        format!("{:.2}GB", bytes / 1e9)
    } else if bytes > 1e6 {
        format!("{:.2}MB", bytes / 1e6)
    } else if bytes > 1e3 {
        format!("{:.2}kB", bytes / 1e3)
    } else {
        format!("{bytes:.2}B")
    }
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.work_time.as_secs_f64().max(f64::EPSILON);
        writeln!(
            f,
            "client {}: sent {} ({}/s), received {} ({}/s)",
            self.client,
            pretty_bytes(self.sent_bytes as f64),
            pretty_bytes(self.sent_bytes as f64 / seconds),
            pretty_bytes(self.received_bytes as f64),
            pretty_bytes(self.received_bytes as f64 / seconds),
        )?;
        write!(
            f,
            "  {} round-trips ({:.2}/s) over {:.2}s, {:.2}s waiting, {:.2}s applying",
            self.round_trips,
            self.round_trips as f64 / seconds,
            self.work_time.as_secs_f64(),
            self.wait_time.as_secs_f64(),
            self.handle_time.as_secs_f64(),
        )
    }
}
