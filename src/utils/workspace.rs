//! # Workspace Pattern for Matcher Buffers
//!
//! Pre-allocated buffers for Viterbi matching, reused across calls so the
//! per-site loop never allocates once the buffers have grown to their
//! working size.
//!
//! ## Design Philosophy
//! The matcher borrows the frozen store immutably; everything it mutates
//! lives here. One workspace per matcher means independent matchers can run
//! concurrently against the same store.

/// Run of consecutive ancestors `[start, end)` sharing one probability
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbInterval {
    pub start: u32,
    pub end: u32,
    pub value: f64,
}

/// Double-buffered run-length probabilities
#[derive(Debug, Default)]
pub struct MatchWorkspace {
    /// Probabilities at the current site
    pub values: Vec<ProbInterval>,

    /// Probabilities being built for the next site
    pub next_values: Vec<ProbInterval>,
}

impl MatchWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a match over `num_ancestors` ancestors, all with probability 1
    pub fn reset_values(&mut self, num_ancestors: u32) {
        self.values.clear();
        self.next_values.clear();
        self.values.push(ProbInterval {
            start: 0,
            end: num_ancestors,
            value: 1.0,
        });
    }

    /// Append to `next_values`, merging with an adjacent equal-valued tail
    #[inline]
    pub fn push_next(&mut self, start: u32, end: u32, value: f64) {
        if let Some(tail) = self.next_values.last_mut() {
            if tail.end == start && tail.value == value {
                tail.end = end;
                return;
            }
        }
        self.next_values.push(ProbInterval { start, end, value });
    }

    /// Make `next_values` current
    #[inline]
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.values, &mut self.next_values);
        self.next_values.clear();
    }

    /// Clear all buffers
    pub fn clear(&mut self) {
        self.values.clear();
        self.next_values.clear();
    }

    /// Bytes reserved by the buffers
    pub fn size_bytes(&self) -> usize {
        (self.values.capacity() + self.next_values.capacity()) * std::mem::size_of::<ProbInterval>()
    }
}
