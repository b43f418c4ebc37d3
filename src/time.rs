use std::time::Instant;

/// Monotonic microsecond clock. The server itself only ever sees the numbers,
/// so tests can drive it with any timeline they like.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) const fn secs_to_us(secs: u64) -> u64 {
    secs * 1_000_000
}
