pub mod packets;

/// Epoch value that can never be the active epoch of a detector.
pub const RESERVED_EPOCH: i64 = -1;

/// Default ports used by the reference loopback scenario
pub const DEFAULT_RESPONDER_PORT: u16 = 6666;
pub const DEFAULT_MONITOR_PORT: u16 = 4567;

/// Heartbeat defaults
pub const DEFAULT_INITIAL_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_MIN_TIMEOUT_MS: u64 = 1;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10;
pub const DEFAULT_LOSS_THRESHOLD: u32 = 6;
