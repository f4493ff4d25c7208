//! Hook installation through the control call.
//!
//! Must run only after the runtime context has been published: the moment a
//! redirect goes live the replacement can fire on another core, and it
//! assumes the slide, capability table, and original handle are in place.

use core::sync::atomic::AtomicU64;

use super::interceptors;
use crate::context;
use crate::control::ControlOps;

/// Callable handles to the displaced originals. The facility writes these
/// before the corresponding redirect becomes visible, so an interceptor that
/// fires immediately still finds its original.
pub(crate) static ORIG_ALLOCATE: AtomicU64 = AtomicU64::new(0);
pub(crate) static ORIG_FREE: AtomicU64 = AtomicU64::new(0);

/// Errors installing the hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallError {
    /// The runtime context has not been published yet.
    NotReady,
    /// The facility refused the redirect; carries the unslid target and the
    /// non-zero status.
    Rejected { target: u64, status: i64 },
}

impl core::fmt::Display for InstallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotReady => write!(f, "runtime context not published before install"),
            Self::Rejected { target, status } => {
                write!(f, "facility rejected hook at {target:#x} (status {status})")
            }
        }
    }
}

impl core::error::Error for InstallError {}

/// Install both interceptors at the configured unslid addresses.
///
/// The facility applies the slide itself; only captured return addresses are
/// ever slide-adjusted on our side.
pub fn install_hooks<C: ControlOps>(ops: &C) -> Result<(), InstallError> {
    let ctx = context::get().ok_or(InstallError::NotReady)?;

    let targets = [
        (
            ctx.offsets.allocate_entry,
            interceptors::allocate_entry as usize as u64,
            &ORIG_ALLOCATE,
            "allocate",
        ),
        (
            ctx.offsets.free_entry,
            interceptors::free_entry as usize as u64,
            &ORIG_FREE,
            "free",
        ),
    ];

    for (target, replacement, original, what) in targets {
        log::info!("installing {what} hook at {target:#x}");
        let status = ops.install_hook(target, replacement, original);
        if status != 0 {
            return Err(InstallError::Rejected { target, status });
        }
    }

    log::info!("both hooks installed");
    Ok(())
}
