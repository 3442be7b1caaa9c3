//! Shared primitive types used across the entire simulation.

/// A simulation tick. One tick advances simulated time by
/// `speed_factor x base_period_ms` milliseconds.
pub type Tick = u64;

/// Simulated time: milliseconds since the Unix epoch.
/// All time arithmetic is integer; rounding happens only at KPI emission.
pub type SimTimeMs = i64;

/// The canonical session identifier (one engine instance per session).
pub type SessionId = String;

/// Index into the `WorkItemStore` arena.
pub type ItemIdx = usize;

/// Indexes into the `PlantTopology` arenas.
pub type ShopIdx = usize;
pub type LineIdx = usize;
pub type StationIdx = usize;
pub type BufferIdx = usize;

/// Monotonically increasing stop identifier, session-local.
pub type StopId = u64;

pub const SECOND_MS: SimTimeMs = 1_000;
pub const MINUTE_MS: SimTimeMs = 60_000;
pub const HOUR_MS: SimTimeMs = 3_600_000;
pub const DAY_MS: SimTimeMs = 86_400_000;
