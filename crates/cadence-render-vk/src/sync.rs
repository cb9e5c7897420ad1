// SPDX-License-Identifier: CEPL-1.0
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use ash::vk;
use cadence_render::{CompletionSignal, WaitStatus};

use crate::{timeout_ns, Shared};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SignalState {
    Signaled,
    Unsignaled,
    Armed(u64),
}

/// Host-side view of one target value on the shared timeline.
pub struct VkCompletionSignal {
    shared: Rc<Shared>,
    state: SignalState,
}

impl VkCompletionSignal {
    pub(crate) fn new(shared: Rc<Shared>) -> Self {
        Self {
            shared,
            state: SignalState::Signaled,
        }
    }
}

/// Blocks until the timeline reaches `value`.
pub(crate) fn wait_timeline(shared: &Shared, value: u64, timeout: Duration) -> Result<WaitStatus> {
    let info = vk::SemaphoreWaitInfo {
        s_type: vk::StructureType::SEMAPHORE_WAIT_INFO,
        semaphore_count: 1,
        p_semaphores: &shared.timeline,
        p_values: &value,
        ..Default::default()
    };
    match unsafe { shared.device.wait_semaphores(&info, timeout_ns(timeout)) } {
        Ok(()) => Ok(WaitStatus::Ready),
        Err(vk::Result::TIMEOUT) => Ok(WaitStatus::TimedOut),
        Err(e) => Err(anyhow!("wait_semaphores({value}): {e:?}")),
    }
}

impl CompletionSignal for VkCompletionSignal {
    fn arm(&mut self, target: u64) -> Result<()> {
        self.state = SignalState::Armed(target);
        Ok(())
    }

    fn wait(&self, timeout: Duration) -> Result<WaitStatus> {
        match self.state {
            SignalState::Signaled => Ok(WaitStatus::Ready),
            SignalState::Unsignaled => Ok(WaitStatus::TimedOut),
            SignalState::Armed(v) => wait_timeline(&self.shared, v, timeout),
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.state = SignalState::Unsignaled;
        Ok(())
    }

    // Every signal targets the same timeline, so reaching the largest armed
    // value satisfies all of them with one wait.
    fn wait_all(signals: &[&Self], timeout: Duration) -> Result<WaitStatus> {
        let mut highest = None;
        for signal in signals {
            match signal.state {
                SignalState::Signaled => {}
                SignalState::Unsignaled => return Ok(WaitStatus::TimedOut),
                SignalState::Armed(v) => highest = highest.max(Some(v)),
            }
        }
        match (highest, signals.first()) {
            (Some(v), Some(first)) => wait_timeline(&first.shared, v, timeout),
            _ => Ok(WaitStatus::Ready),
        }
    }
}
