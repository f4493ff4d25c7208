//! Process-wide runtime context shared with the interceptors.
//!
//! The context is assembled on the setup path and published exactly once;
//! after that the interceptors read it lock-free. Only the two region cells
//! inside it are ever written again.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::capabilities::CapabilityTable;
use crate::config::KernelOffsets;

/// Last-observed identifiers of the two allocation regions of interest.
///
/// Single-writer/multi-reader cells. The kernel may run both interceptors
/// concurrently on independent cores; a stale or torn-timing read here only
/// mislabels one log record, the values never feed an allocation decision.
/// Relaxed atomics express that intentional race without locks, and without
/// adding latency to every allocation on the system.
#[derive(Debug)]
pub struct RegionSlots {
    kernel: AtomicU64,
    fast: AtomicU64,
}

impl RegionSlots {
    fn new(kernel: u64) -> Self {
        Self {
            kernel: AtomicU64::new(kernel),
            fast: AtomicU64::new(0),
        }
    }

    /// Identifier of the general-purpose kernel region.
    pub fn kernel(&self) -> u64 {
        self.kernel.load(Ordering::Relaxed)
    }

    /// Last-observed identifier of the size-segregated region; zero until
    /// the selection call site has been seen once.
    pub fn fast(&self) -> u64 {
        self.fast.load(Ordering::Relaxed)
    }

    /// Record the size-segregated region identifier. Written on every hit of
    /// the selection call site; the concrete identifier varies with the
    /// requested allocation size, so it is never considered final.
    pub fn learn_fast(&self, region: u64) {
        self.fast.store(region, Ordering::Relaxed);
    }
}

/// Everything the interceptors are allowed to read: the slide, the resolved
/// capability table, the offset constants, and the region cells.
#[derive(Debug)]
pub struct RuntimeContext {
    pub slide: u64,
    pub caps: CapabilityTable,
    pub offsets: KernelOffsets,
    pub regions: RegionSlots,
}

impl RuntimeContext {
    /// Assemble a context; the kernel-region cell is seeded from the
    /// capability table.
    pub fn new(slide: u64, caps: CapabilityTable, offsets: KernelOffsets) -> Self {
        Self {
            slide,
            caps,
            offsets,
            regions: RegionSlots::new(caps.kernel_map),
        }
    }
}

/// Errors publishing the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The context has already been published; setup is not reentrant.
    AlreadyPublished,
}

impl core::fmt::Display for ContextError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyPublished => write!(f, "runtime context already published"),
        }
    }
}

impl core::error::Error for ContextError {}

struct GlobalContext(UnsafeCell<Option<RuntimeContext>>);

// SAFETY: the inner Option is written once, before READY is released; after
// that every access is a shared read.
unsafe impl Sync for GlobalContext {}

static CONTEXT: GlobalContext = GlobalContext(UnsafeCell::new(None));
static CLAIMED: AtomicBool = AtomicBool::new(false);
static READY: AtomicBool = AtomicBool::new(false);

/// Publish the context for the interceptors. Must happen before any hook is
/// installed; fails on a second call.
pub fn publish(ctx: RuntimeContext) -> Result<(), ContextError> {
    if CLAIMED.swap(true, Ordering::SeqCst) {
        return Err(ContextError::AlreadyPublished);
    }
    // SAFETY: CLAIMED guarantees this is the only writer, and no reader sees
    // the slot until READY is released below.
    unsafe {
        *CONTEXT.0.get() = Some(ctx);
    }
    READY.store(true, Ordering::Release);
    Ok(())
}

/// The published context, or `None` before [`publish`] has completed.
pub fn get() -> Option<&'static RuntimeContext> {
    if !READY.load(Ordering::Acquire) {
        return None;
    }
    // SAFETY: READY is only set after the single write completed.
    unsafe { (*CONTEXT.0.get()).as_ref() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_slots_learning() {
        let slots = RegionSlots::new(0xFFFF_FFF7_0000_0010);
        assert_eq!(slots.kernel(), 0xFFFF_FFF7_0000_0010);
        assert_eq!(slots.fast(), 0);

        slots.learn_fast(0xFFFF_FFF7_0000_0420);
        assert_eq!(slots.fast(), 0xFFFF_FFF7_0000_0420);

        // Re-learning overwrites; the identifier is size-dependent.
        slots.learn_fast(0xFFFF_FFF7_0000_0660);
        assert_eq!(slots.fast(), 0xFFFF_FFF7_0000_0660);
    }

    #[test]
    fn test_context_seeds_kernel_region_from_caps() {
        let caps = CapabilityTable {
            kprintf: 0,
            current_proc: 0,
            proc_pid: 0,
            proc_name: 0,
            kernel_map: 0xFFFF_FFF7_09AB_C010,
        };
        let offsets = crate::config::KNOWN_BUILDS[0].offsets;
        let ctx = RuntimeContext::new(0x4000, caps, offsets);
        assert_eq!(ctx.regions.kernel(), 0xFFFF_FFF7_09AB_C010);
    }
}
