//! Per-kernel-build address constants.
//!
//! Every address here is an unslid kernelcache address recovered offline from
//! the target device's kernelcache. They are baked in ahead of time and never
//! computed at runtime; running against a kernel build they were not taken
//! from is silently unsafe (wrong classification, or a crash at install
//! time), and nothing in this crate can detect the mismatch.

/// Unslid kernelcache addresses for one kernel build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelOffsets {
    /// Entry point of the generic allocation routine
    /// (`kernel_memory_allocate` on XNU).
    pub allocate_entry: u64,
    /// Entry point of the generic release routine (`kmem_free` on XNU).
    pub free_entry: u64,
    /// Return address of the allocation call issued right after the
    /// size-segregated region has been selected for the request. The unique
    /// call site where that region's identifier can be observed.
    pub region_select_site: u64,
    /// Return address of the allocation call issued on the "size-segregated
    /// region is full, falling back" path.
    pub region_fallback_site: u64,
}

/// A named kernel build with its offset set.
#[derive(Debug, Clone, Copy)]
pub struct KernelBuild {
    /// Device-and-version identifier, e.g. `iphone10,3-14.6`.
    pub name: &'static str,
    pub offsets: KernelOffsets,
}

/// Builds this tracer has offsets for.
///
/// Other devices need their own set pulled from their kernelcache; partial
/// sets are not usable, all four addresses are required.
pub static KNOWN_BUILDS: &[KernelBuild] = &[KernelBuild {
    // iPhone X, iOS 14.6
    name: "iphone10,3-14.6",
    offsets: KernelOffsets {
        allocate_entry: 0xFFFF_FFF0_07B2_666C,
        free_entry: 0xFFFF_FFF0_07B2_8478,
        region_select_site: 0xFFFF_FFF0_07A9_2174,
        region_fallback_site: 0xFFFF_FFF0_07A9_21C4,
    },
}];

/// Build used when none is named on the command line.
pub const DEFAULT_BUILD: &str = "iphone10,3-14.6";

/// Look up a build by its identifier.
pub fn find_build(name: &str) -> Option<&'static KernelBuild> {
    KNOWN_BUILDS.iter().find(|b| b.name == name)
}
