//! Privileged control-call surface.
//!
//! Everything the tracer needs from the hook facility goes through one
//! multiplexed three-argument call: the "are you there" probe, reads from the
//! facility's shared cache, and hook installation. This module abstracts that
//! call behind [`ControlOps`] so the whole setup path can run against a mock
//! on a plain host.

use core::sync::atomic::AtomicU64;

/// Value the facility answers the check-if-patched probe with when it is
/// active and ready.
pub const PATCHED_SENTINEL: i64 = 999;

/// Operation selector for the control call.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlavor {
    /// Probe for facility presence; answers [`PATCHED_SENTINEL`].
    CheckIfPatched = 0,
    /// Redirect a kernel entry point to replacement code.
    InstallHook = 1,
    /// Read one value out of the facility's shared cache.
    CacheRead = 4,
}

/// Keys into the facility's shared cache.
///
/// Ordinals mirror the cache enum exported by the targeted facility release.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CacheKey {
    /// Load-time relocation delta of the kernel image.
    KernelSlide = 0,
    /// Kernel log output routine.
    Kprintf = 1,
    /// Current-process lookup routine.
    CurrentProc = 11,
    /// Process-id lookup routine.
    ProcPid = 12,
    /// Process-name lookup routine.
    ProcName = 13,
    /// Identifier of the kernel's general-purpose allocation region.
    KernelMap = 24,
}

impl CacheKey {
    /// Symbolic name, used in diagnostics when a read fails.
    pub fn name(self) -> &'static str {
        match self {
            Self::KernelSlide => "kernel_slide",
            Self::Kprintf => "kprintf",
            Self::CurrentProc => "current_proc",
            Self::ProcPid => "proc_pid",
            Self::ProcName => "proc_name",
            Self::KernelMap => "kernel_map",
        }
    }
}

/// The three-argument privileged control call.
///
/// `install_hook` hands the facility a slot to write the displaced-original
/// handle into; the facility fills it before the redirect goes live, so a
/// replacement that fires immediately still finds its original.
pub trait ControlOps {
    /// Issue the check-if-patched probe; returns the raw response.
    fn check_if_patched(&self) -> i64;

    /// Read one cached value; `Err` carries the non-zero status.
    fn cache_read(&self, key: CacheKey) -> Result<u64, i64>;

    /// Redirect execution at the unslid `target` to `replacement`, storing
    /// the callable original handle into `original`. Returns the raw status,
    /// zero on success.
    fn install_hook(&self, target: u64, replacement: u64, original: &AtomicU64) -> i64;
}

// =============================================================================
// Real Implementation (device build with the xnuspy feature)
// =============================================================================

#[cfg(all(feature = "xnuspy", any(target_os = "macos", target_os = "ios")))]
mod real {
    use super::*;
    use crate::bootstrap::BootstrapError;

    /// Control calls issued through the facility's dedicated syscall.
    pub struct XnuspyControl {
        callnum: libc::c_long,
    }

    impl XnuspyControl {
        /// Resolve the facility's syscall number from the host by name.
        pub fn discover() -> Result<Self, BootstrapError> {
            let mut callnum: libc::c_long = 0;
            let mut len = core::mem::size_of::<libc::c_long>();
            let ret = unsafe {
                libc::sysctlbyname(
                    c"kern.xnuspy_ctl_callnum".as_ptr(),
                    (&raw mut callnum).cast(),
                    &mut len,
                    core::ptr::null_mut(),
                    0,
                )
            };
            if ret != 0 {
                return Err(BootstrapError::CapabilityUnavailable);
            }
            Ok(Self { callnum })
        }
    }

    impl ControlOps for XnuspyControl {
        fn check_if_patched(&self) -> i64 {
            unsafe {
                libc::syscall(
                    self.callnum as libc::c_int,
                    ControlFlavor::CheckIfPatched as u64,
                    0u64,
                    0u64,
                    0u64,
                ) as i64
            }
        }

        fn cache_read(&self, key: CacheKey) -> Result<u64, i64> {
            let mut out: u64 = 0;
            let status = unsafe {
                libc::syscall(
                    self.callnum as libc::c_int,
                    ControlFlavor::CacheRead as u64,
                    key as u64,
                    &raw mut out,
                    0u64,
                ) as i64
            };
            if status != 0 {
                return Err(status);
            }
            Ok(out)
        }

        fn install_hook(&self, target: u64, replacement: u64, original: &AtomicU64) -> i64 {
            // The facility writes the original handle through this pointer
            // before the redirect becomes visible to other cores.
            let slot = original.as_ptr();
            unsafe {
                libc::syscall(
                    self.callnum as libc::c_int,
                    ControlFlavor::InstallHook as u64,
                    target,
                    replacement,
                    slot,
                ) as i64
            }
        }
    }
}

#[cfg(all(feature = "xnuspy", any(target_os = "macos", target_os = "ios")))]
pub use real::XnuspyControl;

// =============================================================================
// Mock Implementation (host build / tests)
// =============================================================================

#[cfg(any(test, not(feature = "xnuspy")))]
mod mock {
    use super::*;
    use core::sync::atomic::Ordering;
    use spin::Mutex;
    use std::collections::BTreeMap;

    /// Scriptable control call for tests and host builds.
    pub struct MockControl {
        patched_response: i64,
        install_status: i64,
        cache: Mutex<BTreeMap<u64, Result<u64, i64>>>,
        originals: Mutex<BTreeMap<u64, u64>>,
        installs: Mutex<Vec<(u64, u64)>>,
    }

    impl MockControl {
        /// A facility that is present, has an empty cache, and accepts every
        /// install request.
        pub fn new() -> Self {
            Self {
                patched_response: PATCHED_SENTINEL,
                install_status: 0,
                cache: Mutex::new(BTreeMap::new()),
                originals: Mutex::new(BTreeMap::new()),
                installs: Mutex::new(Vec::new()),
            }
        }

        /// A facility pre-seeded with a plausible slide and all five
        /// capability entries.
        pub fn seeded() -> Self {
            let mock = Self::new();
            mock.set_cache(CacheKey::KernelSlide, 0x0000_0000_1A00_4000);
            mock.set_cache(CacheKey::Kprintf, 0xFFFF_FFF0_0809_1234);
            mock.set_cache(CacheKey::CurrentProc, 0xFFFF_FFF0_0809_2000);
            mock.set_cache(CacheKey::ProcPid, 0xFFFF_FFF0_0809_3000);
            mock.set_cache(CacheKey::ProcName, 0xFFFF_FFF0_0809_4000);
            // Low 36 bits only, the way the facility cache stores it.
            mock.set_cache(CacheKey::KernelMap, 0x0000_0007_09AB_C010);
            mock
        }

        /// Override the check-if-patched response.
        pub fn with_patched_response(mut self, response: i64) -> Self {
            self.patched_response = response;
            self
        }

        /// Make every install request fail with `status`.
        pub fn with_install_status(mut self, status: i64) -> Self {
            self.install_status = status;
            self
        }

        /// Script a successful cache read.
        pub fn set_cache(&self, key: CacheKey, value: u64) {
            self.cache.lock().insert(key as u64, Ok(value));
        }

        /// Script a failing cache read.
        pub fn fail_cache(&self, key: CacheKey, status: i64) {
            self.cache.lock().insert(key as u64, Err(status));
        }

        /// Script the displaced-original handle installed for `target`.
        /// Unscripted targets get a synthetic handle derived from the target.
        pub fn set_original(&self, target: u64, handle: u64) {
            self.originals.lock().insert(target, handle);
        }

        /// `(target, replacement)` pairs of every install request seen.
        pub fn installs(&self) -> Vec<(u64, u64)> {
            self.installs.lock().clone()
        }
    }

    impl Default for MockControl {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ControlOps for MockControl {
        fn check_if_patched(&self) -> i64 {
            self.patched_response
        }

        fn cache_read(&self, key: CacheKey) -> Result<u64, i64> {
            match self.cache.lock().get(&(key as u64)) {
                Some(entry) => *entry,
                // Unknown key: the facility reports a generic failure.
                None => Err(-1),
            }
        }

        fn install_hook(&self, target: u64, replacement: u64, original: &AtomicU64) -> i64 {
            if self.install_status != 0 {
                return self.install_status;
            }
            self.installs.lock().push((target, replacement));
            // Scripted handle if any, otherwise a synthetic one derived from
            // the target so tests can tell the two hooks apart. Must stay
            // nonzero for every target; zero is the "no original" sentinel.
            let handle = self
                .originals
                .lock()
                .get(&target)
                .copied()
                .unwrap_or(target.wrapping_add(0x1000) | 1);
            original.store(handle, Ordering::Relaxed);
            0
        }
    }
}

#[cfg(any(test, not(feature = "xnuspy")))]
pub use mock::MockControl;
