//! The counter surface exposed by client and server connections.

/// Plain counters updated by a connection's send and receive loops.
///
/// Counters live under the connection lock and are exposed as read-only
/// snapshots; a server's totals are a folded sum over closed connections
/// plus its live ones.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Requests processed.
    pub nreqs: u64,
    /// Total bytes of T-messages.
    pub tsz: u64,
    /// Total bytes of R-messages.
    pub rsz: u64,
    /// Currently pending requests.
    pub npend: u64,
    /// High-water mark of pending requests.
    pub maxpend: u64,
    /// Reads from the connection.
    pub nreads: u64,
    /// Writes to the connection.
    pub nwrites: u64,
}

impl Stats {
    /// Folds another connection's counters into this total.
    ///
    /// Gauges (`npend`) are not summed; the high-water mark is.
    pub fn absorb(&mut self, other: &Stats) {
        self.nreqs += other.nreqs;
        self.tsz += other.tsz;
        self.rsz += other.rsz;
        self.maxpend += other.maxpend;
        self.nreads += other.nreads;
        self.nwrites += other.nwrites;
    }
}
