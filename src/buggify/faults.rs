//! Named fault injection sites

/// Faults injected in front of the task queue
pub mod queue {
    pub const ADD_FAIL: &str = "queue.add_fail";
    pub const LEASE_FAIL: &str = "queue.lease_fail";
    pub const DELETE_FAIL: &str = "queue.delete_fail";
    pub const PURGE_FAIL: &str = "queue.purge_fail";
    pub const TIMEOUT: &str = "queue.timeout";
    /// Lease returns fewer tasks than were visible
    pub const SHORT_LEASE: &str = "queue.short_lease";
}

/// Faults injected by the DST harness around the embedding process
pub mod process {
    /// Collector dies between aggregation and commit
    pub const CRASH_BEFORE_COMMIT: &str = "process.crash_before_commit";
}

/// Every known fault id
pub const ALL_FAULTS: &[&str] = &[
    queue::ADD_FAIL,
    queue::LEASE_FAIL,
    queue::DELETE_FAIL,
    queue::PURGE_FAIL,
    queue::TIMEOUT,
    queue::SHORT_LEASE,
    process::CRASH_BEFORE_COMMIT,
];
