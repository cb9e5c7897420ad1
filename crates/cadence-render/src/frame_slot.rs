// SPDX-License-Identifier: CEPL-1.0
//! Per-frame recording contexts and the signals that guard their reuse.

use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{PipelineError, PipelineResult, PlatformContext, WaitScope};
use crate::{CommandContext, CompletionSignal, Device, Fence, WaitStatus};

/// Slot recorded during `cycle`.
pub fn slot_index(cycle: u64, slot_count: usize) -> usize {
    (cycle % slot_count as u64) as usize
}

struct FrameSlot<D: Device> {
    context: D::Context,
    signal: D::Signal,
    armed: Option<u64>,
}

pub struct FrameSlots<D: Device> {
    slots: Vec<FrameSlot<D>>,
}

impl<D: Device> FrameSlots<D> {
    pub fn new(device: &mut D, count: usize) -> PipelineResult<Self> {
        if count == 0 {
            return Err(PipelineError::InvalidSettings(
                "at least one frame slot is required".into(),
            ));
        }
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            slots.push(FrameSlot {
                context: device.create_context().platform("create command context")?,
                signal: device.create_signal().platform("create completion signal")?,
                armed: None,
            });
        }
        debug!(count, "frame slots created");
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Forgets every slot without destroying it, for when the GPU may still
    /// be using them.
    pub fn leak(&mut self) {
        std::mem::forget(std::mem::take(&mut self.slots));
    }

    /// Blocks until slot `cycle mod N` is retired by the GPU, then reopens it.
    ///
    /// The returned guard is the only path to the slot's context and to
    /// re-arming its signal.
    pub fn acquire(&mut self, cycle: u64, timeout: Duration) -> PipelineResult<SlotGuard<'_, D>> {
        let index = slot_index(cycle, self.slots.len());
        let slot = &mut self.slots[index];

        match slot.signal.wait(timeout).platform("wait for frame slot")? {
            WaitStatus::Ready => {}
            WaitStatus::TimedOut => {
                return Err(PipelineError::Timeout {
                    scope: WaitScope::Slot(index),
                    timeout,
                })
            }
        }
        trace!(index, retired = ?slot.armed, "frame slot retired");

        slot.signal.reset().platform("reset completion signal")?;
        slot.context.reset().platform("reset command context")?;
        Ok(SlotGuard { index, slot })
    }

    /// Waits for every slot at once.
    pub fn drain(&self, timeout: Duration) -> PipelineResult<()> {
        let signals: Vec<&D::Signal> = self.slots.iter().map(|s| &s.signal).collect();
        let status = <D::Signal as CompletionSignal>::wait_all(&signals, timeout)
            .platform("drain frame slots")?;
        match status {
            WaitStatus::Ready => {
                trace!(slots = signals.len(), "frame slots drained");
                Ok(())
            }
            WaitStatus::TimedOut => Err(PipelineError::Timeout {
                scope: WaitScope::Drain,
                timeout,
            }),
        }
    }
}

/// A retired slot open for recording.
pub struct SlotGuard<'a, D: Device> {
    index: usize,
    slot: &'a mut FrameSlot<D>,
}

impl<D: Device> SlotGuard<'_, D> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn context(&self) -> &D::Context {
        &self.slot.context
    }

    pub fn context_mut(&mut self) -> &mut D::Context {
        &mut self.slot.context
    }

    /// Hands the slot back to the GPU until `value` completes.
    pub fn arm(self, fence: &Fence, value: u64) -> PipelineResult<()> {
        fence.arm(value, &mut self.slot.signal)?;
        self.slot.armed = Some(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_cycles_modulo_count() {
        for cycle in 0..20u64 {
            assert_eq!(slot_index(cycle, 2), (cycle % 2) as usize);
        }
        assert_eq!(slot_index(u64::MAX, 2), 1);
    }

    #[test]
    fn every_window_of_n_visits_each_slot_once() {
        for n in 1..=4usize {
            for start in 0..10u64 {
                let mut seen = vec![0u32; n];
                for cycle in start..start + n as u64 {
                    seen[slot_index(cycle, n)] += 1;
                }
                assert!(seen.iter().all(|&c| c == 1), "n={n} start={start}");
            }
        }
    }
}
