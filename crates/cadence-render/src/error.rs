// SPDX-License-Identifier: CEPL-1.0
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitScope {
    Slot(usize),
    Drain,
}

impl fmt::Display for WaitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitScope::Slot(i) => write!(f, "frame slot {i}"),
            WaitScope::Drain => f.write_str("pipeline drain"),
        }
    }
}

/// Every variant is fatal for the pipeline: synchronization state is no
/// longer known once one of these surfaces.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{operation} failed")]
    Platform {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("timed out after {timeout:?} waiting on {scope}")]
    Timeout { scope: WaitScope, timeout: Duration },

    #[error("view slot {index} outside heap of {capacity}")]
    ViewHeapExhausted { index: u32, capacity: u32 },

    #[error("swapchain image {index} outside backbuffer table of {count}")]
    ImageIndexOutOfRange { index: u32, count: usize },

    #[error("invalid pipeline settings: {0}")]
    InvalidSettings(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Tags a collaborator failure with the pipeline operation that hit it.
pub(crate) trait PlatformContext<T> {
    fn platform(self, operation: &'static str) -> PipelineResult<T>;
}

impl<T> PlatformContext<T> for anyhow::Result<T> {
    fn platform(self, operation: &'static str) -> PipelineResult<T> {
        self.map_err(|source| PipelineError::Platform { operation, source })
    }
}
