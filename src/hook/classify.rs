//! Region classification from the only signals available in the hook
//! environment: the slide-adjusted call site and raw region identifiers.
//!
//! The kernel's own region bookkeeping is unreachable from the interceptors,
//! so identity is decided by equality against offline-derived indicator
//! addresses and the two cached identifiers. Pure functions, unit-testable
//! without any privileged call.

use crate::config::KernelOffsets;

/// Advisory label attached to a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionLabel {
    /// The general-purpose kernel region.
    KernelRegion,
    /// The size-segregated fast-path region.
    SizeSegregated,
    /// Neither cached identifier matched; labeled blank.
    Unresolved,
}

impl RegionLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KernelRegion => "kernel-region",
            Self::SizeSegregated => "size-segregated",
            Self::Unresolved => "",
        }
    }
}

/// Outcome of classifying one allocation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocVerdict {
    pub label: RegionLabel,
    /// The call came from the region-selection site: the fast-region cell
    /// must learn the handle seen on this call.
    pub learn_fast: bool,
    /// The call came from the fallback site: the size-segregated region
    /// reported full and the request fell back to the kernel region.
    pub fell_back: bool,
}

/// Classify an allocation call.
///
/// The selection call site is the one place the size-segregated region is
/// chosen, so a hit there both labels the call and identifies the region for
/// later releases. The fast-region cell itself is deliberately not consulted
/// here; on this path the call site is the stronger signal.
pub fn classify_allocate(
    call_site: u64,
    region: u64,
    cached_kernel: u64,
    offsets: &KernelOffsets,
) -> AllocVerdict {
    let learn_fast = call_site == offsets.region_select_site;
    let label = if learn_fast {
        RegionLabel::SizeSegregated
    } else if region == cached_kernel {
        RegionLabel::KernelRegion
    } else {
        RegionLabel::Unresolved
    };
    AllocVerdict {
        label,
        learn_fast,
        fell_back: call_site == offsets.region_fallback_site,
    }
}

/// Classify a release call by identifier equality alone. No call-site
/// learning on this path; the region is not being discovered here.
pub fn classify_release(region: u64, cached_kernel: u64, cached_fast: u64) -> RegionLabel {
    if region == cached_kernel {
        RegionLabel::KernelRegion
    } else if cached_fast != 0 && region == cached_fast {
        RegionLabel::SizeSegregated
    } else {
        RegionLabel::Unresolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KERNEL: u64 = 0xFFFF_FFF7_0000_0010;
    const FAST: u64 = 0xFFFF_FFF7_0000_0420;

    fn offsets() -> KernelOffsets {
        KernelOffsets {
            allocate_entry: 0xFFFF_FFF0_07B2_666C,
            free_entry: 0xFFFF_FFF0_07B2_8478,
            region_select_site: 0xFFFF_FFF0_07A9_2174,
            region_fallback_site: 0xFFFF_FFF0_07A9_21C4,
        }
    }

    #[test]
    fn test_allocate_selection_site_wins() {
        let offs = offsets();
        // Even the kernel handle is labeled size-segregated at the
        // selection site; the call site is authoritative there.
        let verdict = classify_allocate(offs.region_select_site, KERNEL, KERNEL, &offs);
        assert_eq!(verdict.label, RegionLabel::SizeSegregated);
        assert!(verdict.learn_fast);
        assert!(!verdict.fell_back);
    }

    #[test]
    fn test_allocate_kernel_by_identifier() {
        let offs = offsets();
        let verdict = classify_allocate(0xDEAD, KERNEL, KERNEL, &offs);
        assert_eq!(verdict.label, RegionLabel::KernelRegion);
        assert!(!verdict.learn_fast);
    }

    #[test]
    fn test_allocate_unresolved() {
        let offs = offsets();
        let verdict = classify_allocate(0xDEAD, FAST, KERNEL, &offs);
        assert_eq!(verdict.label, RegionLabel::Unresolved);
        assert_eq!(verdict.label.as_str(), "");
    }

    #[test]
    fn test_allocate_fallback_is_independent() {
        let offs = offsets();
        let verdict = classify_allocate(offs.region_fallback_site, KERNEL, KERNEL, &offs);
        assert!(verdict.fell_back);
        // Fallback lands in the kernel region, and the identifier says so.
        assert_eq!(verdict.label, RegionLabel::KernelRegion);
    }

    #[test]
    fn test_release_by_identifier() {
        assert_eq!(classify_release(KERNEL, KERNEL, FAST), RegionLabel::KernelRegion);
        assert_eq!(classify_release(FAST, KERNEL, FAST), RegionLabel::SizeSegregated);
        assert_eq!(classify_release(0xBEEF, KERNEL, FAST), RegionLabel::Unresolved);
    }

    #[test]
    fn test_release_unlearned_fast_cell_never_matches() {
        // Cell still zero: a zero handle must not be labeled size-segregated.
        assert_eq!(classify_release(0, KERNEL, 0), RegionLabel::Unresolved);
    }
}
