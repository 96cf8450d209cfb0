//! Fixed capacities and thresholds shared by the directory, arena,
//! hotness promoter and residency manager.

/// Code arena size in bytes.
pub const CACHE_SIZE: usize = 16 * 1024 * 1024;

/// Directory slot count (N). Sized far above the expected number of
/// distinct translated blocks so the arena exhausts before the
/// directory's open-addressing load factor gets dangerous.
pub const CACHE_ENTRY_SIZE: usize = 1 << 16;

/// Interpretation-visit threshold (H) a PC must cross before it is
/// eligible for native dispatch.
pub const CACHE_HOT_COUNT: u16 = 16;

/// Residency queue capacity (Q): how many translated blocks may be
/// considered resident in the fast tier at once.
pub const QUEUE_MAX_SIZE: usize = 16;

/// Maximum open-addressing probe distance (P) before a directory
/// lookup or insert is considered fatally undersized.
pub const MAX_SEARCH_COUNT: usize = 32;

/// Exponential decay factor (α) applied to residency priorities on
/// each attenuation pass.
pub const ATTENUATION_ALPHA: f64 = 0.95;
