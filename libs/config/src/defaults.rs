//! Runtime defaults
//!
//! Default values used when a configuration file leaves a setting out.

/// Forwarded remote call timeout (milliseconds)
pub const CALL_TIMEOUT_MS: u64 = 30_000;

/// Remote connect timeout (milliseconds)
pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Maximum size of a single remote frame
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Threads driving remote connections and the remote server
pub const IO_THREADS: usize = 2;

/// Default log filter
pub const LOG_LEVEL: &str = "info";

/// Environment variable prefix for overrides (`TRANSIT_RUNTIME__NUM_THREADS=8`)
pub const ENV_PREFIX: &str = "TRANSIT";

/// Worker pool size when none is configured
pub fn num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
