//! Call tracing transform.

use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;

/// `tracing` target every intercepted call is logged under.
pub const CALL_TARGET: &str = "vkcap::calls";

/// Logs every entry point at `trace` level, with the error for failed calls,
/// and forwards it unchanged.
#[derive(Debug, Default)]
pub struct CallTrace {
    calls: AtomicU64,
}

impl CallTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls seen so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub(crate) fn count(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// How a call's return value reports failure.
pub trait CallOutcome {
    fn failure(&self) -> Option<vk::Result> {
        None
    }
}

impl<T> CallOutcome for Result<T, vk::Result> {
    fn failure(&self) -> Option<vk::Result> {
        self.as_ref().err().copied()
    }
}

impl CallOutcome for Result<Vec<vk::Pipeline>, (Vec<vk::Pipeline>, vk::Result)> {
    fn failure(&self) -> Option<vk::Result> {
        self.as_ref().err().map(|(_, err)| *err)
    }
}

impl CallOutcome for () {}
impl CallOutcome for vk::Queue {}
impl CallOutcome for vk::PhysicalDeviceProperties {}
impl CallOutcome for vk::PhysicalDeviceMemoryProperties {}
impl CallOutcome for vk::MemoryRequirements {}
impl CallOutcome for Vec<vk::QueueFamilyProperties> {}
