use std::time::Duration;

/// Decides how long to wait before handing out each body chunk.
///
/// Pacing only delays delivery; it never alters the bytes.
pub trait Pacer: Send + Sync {
    fn delay_for(&self, chunk_len: usize) -> Option<Duration>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoPacing;

impl Pacer for NoPacing {
    fn delay_for(&self, _chunk_len: usize) -> Option<Duration> {
        None
    }
}

/// Waits the same fixed delay before every chunk.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl Pacer for FixedDelay {
    fn delay_for(&self, _chunk_len: usize) -> Option<Duration> {
        (!self.0.is_zero()).then_some(self.0)
    }
}
