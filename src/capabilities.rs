//! Capability function resolution from the facility cache.
//!
//! The interceptors run inside the kernel with no access to ordinary runtime
//! facilities, so every function they are allowed to call is resolved here,
//! once, before installation. All five entries are required; a missing one
//! aborts setup rather than installing half-working hooks.

use crate::control::{CacheKey, ControlOps};

/// Longest short process name the kernel reports, excluding the terminator.
pub const MAXCOMLEN: usize = 16;

/// High bits forced onto the kernel-region identifier. The facility cache
/// stores only the low canonical bits; live region handles carry the full
/// sign-extended kernel address pattern.
pub const KERNEL_ADDR_HIGH_BITS: u64 = 0xFFFF_FFF0_0000_0000;

/// Current-process lookup, resolved from the facility cache.
pub type CurrentProcFn = unsafe extern "C" fn() -> u64;
/// Pid-of-process lookup.
pub type ProcPidFn = unsafe extern "C" fn(u64) -> i32;
/// Short-name-of-pid lookup; writes at most `len` bytes including NUL.
pub type ProcNameFn = unsafe extern "C" fn(i32, *mut u8, i32);

/// Resolved capability addresses, populated once at startup and read-only
/// afterwards. Raw addresses rather than typed pointers so the table can be
/// built from the cache (or from test functions) without unsafe at the seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityTable {
    /// Kernel log output routine (C-variadic).
    pub kprintf: u64,
    /// Current-process lookup.
    pub current_proc: u64,
    /// Pid lookup.
    pub proc_pid: u64,
    /// Name lookup.
    pub proc_name: u64,
    /// Identifier of the kernel's general-purpose allocation region,
    /// already sign-extended.
    pub kernel_map: u64,
}

/// Errors while loading the capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityError {
    /// A required cache entry could not be read; carries the entry's name
    /// and the non-zero status.
    Missing(&'static str, i64),
}

impl core::fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Missing(name, status) => {
                write!(f, "required capability {name} missing from facility cache (status {status})")
            }
        }
    }
}

impl core::error::Error for CapabilityError {}

fn read<C: ControlOps>(ops: &C, key: CacheKey) -> Result<u64, CapabilityError> {
    ops.cache_read(key)
        .map_err(|status| CapabilityError::Missing(key.name(), status))
}

/// Resolve all five capability entries, failing fast on the first miss.
pub fn load<C: ControlOps>(ops: &C) -> Result<CapabilityTable, CapabilityError> {
    let kprintf = read(ops, CacheKey::Kprintf)?;
    let kernel_map = read(ops, CacheKey::KernelMap)? | KERNEL_ADDR_HIGH_BITS;
    let proc_name = read(ops, CacheKey::ProcName)?;
    let proc_pid = read(ops, CacheKey::ProcPid)?;
    let current_proc = read(ops, CacheKey::CurrentProc)?;

    log::info!(
        "capabilities resolved: kprintf={kprintf:#x} kernel_map={kernel_map:#x} \
         proc_name={proc_name:#x} proc_pid={proc_pid:#x} current_proc={current_proc:#x}"
    );

    Ok(CapabilityTable {
        kprintf,
        current_proc,
        proc_pid,
        proc_name,
        kernel_map,
    })
}

/// Pid and short name of whichever process context the intercepted call ran
/// in. Recomputed on every hit, never cached. For releases triggered by
/// kernel-internal paths this can name a process other than the one whose
/// memory is involved; no better signal exists in the hook environment.
#[derive(Debug, Clone, Copy)]
pub struct CallerIdentity {
    pub pid: i32,
    name: [u8; MAXCOMLEN + 1],
    len: u8,
}

impl CallerIdentity {
    /// Identity with pid 0 and an empty name, the degraded result when a
    /// lookup capability is unusable.
    pub fn unknown() -> Self {
        Self {
            pid: 0,
            name: [0; MAXCOMLEN + 1],
            len: 0,
        }
    }

    /// The short process name, empty when resolution degraded. A name the
    /// kernel truncated mid multi-byte character keeps its longest valid
    /// prefix.
    pub fn name(&self) -> &str {
        let bytes = &self.name[..self.len as usize];
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => {
                let valid = e.valid_up_to();
                core::str::from_utf8(&bytes[..valid]).unwrap_or("")
            }
        }
    }
}

impl CapabilityTable {
    /// Resolve the calling process, best-effort. Any null capability or a
    /// null current-process degrades to [`CallerIdentity::unknown`]; this
    /// path never fails and never allocates.
    pub fn caller_identity(&self) -> CallerIdentity {
        let mut identity = CallerIdentity::unknown();
        if self.current_proc == 0 || self.proc_pid == 0 {
            return identity;
        }

        // SAFETY: the table is only ever populated with addresses of
        // functions of these exact signatures, either from the facility
        // cache or from test doubles.
        let current_proc: CurrentProcFn = unsafe { core::mem::transmute(self.current_proc) };
        let proc_pid: ProcPidFn = unsafe { core::mem::transmute(self.proc_pid) };

        let proc_handle = unsafe { current_proc() };
        if proc_handle == 0 {
            return identity;
        }
        identity.pid = unsafe { proc_pid(proc_handle) };

        if self.proc_name != 0 {
            let proc_name: ProcNameFn = unsafe { core::mem::transmute(self.proc_name) };
            unsafe {
                proc_name(
                    identity.pid,
                    identity.name.as_mut_ptr(),
                    (MAXCOMLEN + 1) as i32,
                )
            };
            identity.len = identity
                .name
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(MAXCOMLEN) as u8;
        }

        identity
    }
}
