//! Best-effort release of accelerator memory between evaluation stages.

use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::obs;

/// Releases resources held by the process after a stage. Never fails.
pub trait Reclaimer: Send + Sync {
    fn reclaim(&self);
}

/// An allocation that may live in device memory.
pub trait DeviceResident: Send {
    fn label(&self) -> &str;

    /// Whether the allocation currently sits on the device.
    fn on_device(&self) -> bool;
}

/// The accelerator runtime's cache control.
pub trait DeviceRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Return cached device memory to the driver; yields bytes released.
    fn release_cached(&self) -> anyhow::Result<u64>;
}

/// Runtime for hosts without an accelerator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDevice;

impl DeviceRuntime for NoDevice {
    fn name(&self) -> &str {
        "none"
    }

    fn release_cached(&self) -> anyhow::Result<u64> {
        Ok(0)
    }
}

/// Outcome of one reclamation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimStats {
    pub dropped: usize,
    pub released_bytes: u64,
}

/// Drops registered device-resident allocations, then flushes the runtime cache.
pub struct DeviceMemoryReclaimer {
    runtime: Box<dyn DeviceRuntime>,
    resident: Mutex<Vec<Box<dyn DeviceResident>>>,
}

impl Default for DeviceMemoryReclaimer {
    fn default() -> Self {
        Self::new(NoDevice)
    }
}

impl DeviceMemoryReclaimer {
    pub fn new(runtime: impl DeviceRuntime + 'static) -> Self {
        Self {
            runtime: Box::new(runtime),
            resident: Mutex::new(Vec::new()),
        }
    }

    /// Track an allocation so the next pass can drop it.
    ///
    /// Suites that load models in-process register their weights here
    /// through a shared `Arc<DeviceMemoryReclaimer>` that is also handed to
    /// the stage runner. Out-of-process suites release memory by exiting.
    pub fn register(&self, allocation: Box<dyn DeviceResident>) {
        self.resident
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(allocation);
    }

    pub fn tracked(&self) -> usize {
        self.resident.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run one pass. Runtime errors and panics are logged and swallowed.
    pub fn reclaim_pass(&self) -> ReclaimStats {
        let mut stats = ReclaimStats::default();

        let dropped = std::panic::catch_unwind(AssertUnwindSafe(|| self.drop_resident()));
        match dropped {
            Ok(count) => stats.dropped = count,
            Err(panic) => warn!(
                error = %panic_message(panic.as_ref()),
                "Dropping device allocations panicked"
            ),
        }

        let released = std::panic::catch_unwind(AssertUnwindSafe(|| self.runtime.release_cached()));
        match released {
            Ok(Ok(bytes)) => stats.released_bytes = bytes,
            Ok(Err(e)) => warn!(
                runtime = self.runtime.name(),
                error = %e,
                "Device cache release failed"
            ),
            Err(panic) => warn!(
                runtime = self.runtime.name(),
                error = %panic_message(panic.as_ref()),
                "Device cache release panicked"
            ),
        }

        obs::emit_reclaimed(self.runtime.name(), stats.dropped, stats.released_bytes);
        stats
    }

    fn drop_resident(&self) -> usize {
        let mut resident = self.resident.lock().unwrap_or_else(|e| e.into_inner());
        let before = resident.len();
        resident.retain(|allocation| {
            let on_device = allocation.on_device();
            if on_device {
                debug!(label = allocation.label(), "Dropping device allocation");
            }
            !on_device
        });
        before - resident.len()
    }
}

impl Reclaimer for DeviceMemoryReclaimer {
    fn reclaim(&self) {
        self.reclaim_pass();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Weights {
        label: String,
        on_device: bool,
        drops: Arc<AtomicUsize>,
    }

    impl DeviceResident for Weights {
        fn label(&self) -> &str {
            &self.label
        }
        fn on_device(&self) -> bool {
            self.on_device
        }
    }

    impl Drop for Weights {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Releases whatever is cached once, then nothing.
    struct CachingRuntime {
        cached: AtomicU64,
    }

    impl DeviceRuntime for CachingRuntime {
        fn name(&self) -> &str {
            "fake"
        }
        fn release_cached(&self) -> anyhow::Result<u64> {
            Ok(self.cached.swap(0, Ordering::SeqCst))
        }
    }

    struct FailingRuntime;

    impl DeviceRuntime for FailingRuntime {
        fn name(&self) -> &str {
            "failing"
        }
        fn release_cached(&self) -> anyhow::Result<u64> {
            anyhow::bail!("driver not loaded")
        }
    }

    struct PanickingRuntime;

    impl DeviceRuntime for PanickingRuntime {
        fn name(&self) -> &str {
            "panicking"
        }
        fn release_cached(&self) -> anyhow::Result<u64> {
            panic!("driver crashed")
        }
    }

    fn weights(label: &str, on_device: bool, drops: &Arc<AtomicUsize>) -> Box<dyn DeviceResident> {
        Box::new(Weights {
            label: label.to_string(),
            on_device,
            drops: Arc::clone(drops),
        })
    }

    #[test]
    fn test_drops_only_device_resident() {
        let drops = Arc::new(AtomicUsize::new(0));
        let reclaimer = DeviceMemoryReclaimer::new(CachingRuntime {
            cached: AtomicU64::new(4096),
        });
        reclaimer.register(weights("model", true, &drops));
        reclaimer.register(weights("tokenizer", false, &drops));

        let stats = reclaimer.reclaim_pass();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.released_bytes, 4096);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(reclaimer.tracked(), 1);
    }

    #[test]
    fn test_second_pass_is_noop() {
        let drops = Arc::new(AtomicUsize::new(0));
        let reclaimer = DeviceMemoryReclaimer::new(CachingRuntime {
            cached: AtomicU64::new(10),
        });
        reclaimer.register(weights("model", true, &drops));

        reclaimer.reclaim();
        let second = reclaimer.reclaim_pass();
        assert_eq!(second, ReclaimStats::default());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_runtime_error_swallowed() {
        let drops = Arc::new(AtomicUsize::new(0));
        let reclaimer = DeviceMemoryReclaimer::new(FailingRuntime);
        reclaimer.register(weights("model", true, &drops));

        let stats = reclaimer.reclaim_pass();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.released_bytes, 0);
    }

    #[test]
    fn test_runtime_panic_swallowed() {
        let reclaimer = DeviceMemoryReclaimer::new(PanickingRuntime);
        reclaimer.reclaim();
        assert_eq!(reclaimer.reclaim_pass().released_bytes, 0);
    }

    #[test]
    fn test_no_device_default() {
        let reclaimer = DeviceMemoryReclaimer::default();
        assert_eq!(reclaimer.reclaim_pass(), ReclaimStats::default());
    }
}
