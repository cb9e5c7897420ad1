// SPDX-License-Identifier: CEPL-1.0
//! Monotonic fence counter shared by every submission on the queue.

use tracing::trace;

use crate::error::{PipelineResult, PlatformContext};
use crate::{CompletionSignal, FenceQueue};

/// Hands out strictly increasing values; the queue signals them in
/// submission order.
#[derive(Debug)]
pub struct Fence {
    next_value: u64,
}

impl Fence {
    pub fn new() -> Self {
        Self { next_value: 1 }
    }

    /// Last value handed to the queue, 0 before the first signal.
    pub fn last_signaled(&self) -> u64 {
        self.next_value - 1
    }

    /// The value is consumed even if the queue rejects it.
    pub fn signal<Q: FenceQueue + ?Sized>(&mut self, queue: &mut Q) -> PipelineResult<u64> {
        let value = self.next_value;
        self.next_value += 1;
        queue.signal_fence(value).platform("signal fence")?;
        trace!(value, "fence signaled");
        Ok(value)
    }

    /// Ties `signal` to "GPU has processed through `value`".
    pub fn arm<S: CompletionSignal>(&self, value: u64, signal: &mut S) -> PipelineResult<()> {
        debug_assert!(
            value <= self.last_signaled(),
            "arming fence value {value} that was never signaled"
        );
        signal.arm(value).platform("arm completion signal")
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new()
    }
}
