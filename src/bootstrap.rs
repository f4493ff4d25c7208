//! Facility negotiation and kernel slide retrieval.
//!
//! Runs exactly once, single-threaded, before anything else touches the
//! control call. Every failure here is fatal to the process; there is no
//! retry and no partial state to clean up.

use crate::control::{CacheKey, ControlOps, PATCHED_SENTINEL};

/// Errors detectable while negotiating access to the hook facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapError {
    /// The host does not know the facility's control-call name.
    CapabilityUnavailable,
    /// The check-if-patched probe did not answer the expected sentinel;
    /// carries the response actually seen.
    FacilityNotPresent(i64),
    /// The slide could not be read from the facility cache; carries the
    /// non-zero status.
    SlideUnavailable(i64),
}

impl core::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CapabilityUnavailable => {
                write!(f, "control call number unknown to the host")
            }
            Self::FacilityNotPresent(got) => {
                write!(
                    f,
                    "hook facility not present (probe answered {got}, expected {PATCHED_SENTINEL})"
                )
            }
            Self::SlideUnavailable(status) => {
                write!(f, "failed reading kernel slide from facility cache (status {status})")
            }
        }
    }
}

impl core::error::Error for BootstrapError {}

/// Verify the facility is active and fetch the kernel slide.
///
/// The returned slide is the process-wide load offset; callers must subtract
/// it from any captured runtime address before comparing against the unslid
/// constants in [`crate::config`].
pub fn negotiate<C: ControlOps>(ops: &C) -> Result<u64, BootstrapError> {
    let response = ops.check_if_patched();
    if response != PATCHED_SENTINEL {
        return Err(BootstrapError::FacilityNotPresent(response));
    }

    let slide = ops
        .cache_read(CacheKey::KernelSlide)
        .map_err(BootstrapError::SlideUnavailable)?;

    log::info!("hook facility present, kernel slide {slide:#x}");
    Ok(slide)
}
