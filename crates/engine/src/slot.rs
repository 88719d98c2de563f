//! Deterministic dispatch slots.
//!
//! A feed's slot is a hash of its URL modulo its refresh interval, so every
//! scheduler replica agrees on when a feed is due without coordinating.

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Width of the dispatch window opened on every tick.
pub const WINDOW_DURATION_MS: u64 = 60_000;

/// 64-bit FNV-1a over the UTF-16 code units of `s`, truncated to 32 bits.
pub fn fnv1a_hash(s: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for unit in s.encode_utf16() {
        hash ^= u64::from(unit);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as u32
}

/// Offset of the feed's slot within its refresh interval. A zero rate yields 0.
pub fn calculate_slot_offset_ms(url: &str, refresh_rate_seconds: u32) -> u64 {
    let refresh_rate_ms = u64::from(refresh_rate_seconds) * 1000;
    if refresh_rate_ms == 0 {
        return 0;
    }
    u64::from(fnv1a_hash(url)) % refresh_rate_ms
}

/// The slice of a refresh interval being dispatched on the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWindow {
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub wraps_around_interval: bool,
    pub refresh_rate_ms: u64,
}

impl SlotWindow {
    /// Window for `refresh_rate_seconds` at wall-clock `now_ms`.
    pub fn at(refresh_rate_seconds: u32, now_ms: u64) -> Self {
        let refresh_rate_ms = u64::from(refresh_rate_seconds) * 1000;
        let window_start_ms = now_ms.checked_rem(refresh_rate_ms).unwrap_or(0);
        let window_end_ms = window_start_ms + WINDOW_DURATION_MS;

        Self {
            window_start_ms,
            window_end_ms,
            wraps_around_interval: window_end_ms > refresh_rate_ms,
            refresh_rate_ms,
        }
    }

    /// Whether a slot offset falls inside the window.
    pub fn contains(&self, slot_offset_ms: u64) -> bool {
        if self.wraps_around_interval {
            slot_offset_ms >= self.window_start_ms
                || slot_offset_ms < self.window_end_ms - self.refresh_rate_ms
        } else {
            slot_offset_ms >= self.window_start_ms && slot_offset_ms < self.window_end_ms
        }
    }

    /// End of the wrapped part at the beginning of the interval, when wrapping.
    pub fn wrapped_end_ms(&self) -> Option<u64> {
        self.wraps_around_interval
            .then(|| self.window_end_ms.saturating_sub(self.refresh_rate_ms))
    }
}

/// Window for `refresh_rate_seconds` at the current wall-clock time.
pub fn calculate_current_slot_window(refresh_rate_seconds: u32) -> SlotWindow {
    let now_ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
    SlotWindow::at(refresh_rate_seconds, now_ms)
}
