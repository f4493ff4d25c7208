//! The interposed kernel entry points.
//!
//! These run inside the kernel in place of the real allocation and release
//! routines, with the original calling convention and none of the usual
//! runtime services: no heap, no formatted stdio, no dynamic library calls,
//! no blocking. The only output channel is the pre-resolved kernel log
//! capability, and log delivery is fire-and-forget; a dropped record is an
//! accepted loss.
//!
//! The `extern "C"` shells do the environment-specific work (return-address
//! capture, global context and original-handle loads) and delegate to probe
//! bodies that take the original function and the emitter as closures, so
//! the whole observation protocol is exercised by host tests.

use core::fmt::Write;
use core::sync::atomic::Ordering;

use super::classify::{classify_allocate, classify_release};
use super::installer::{ORIG_ALLOCATE, ORIG_FREE};
use super::linebuf::LineBuf;
use crate::capabilities::CapabilityTable;
use crate::context::{self, RuntimeContext};

/// Kernel result code.
pub type KernReturn = i32;

/// Generic kernel failure code. Returned only on the never-expected path
/// where a hook fires before setup finished publishing its state.
pub const KERN_FAILURE: KernReturn = 5;

/// Signature of the displaced allocation routine.
pub type AllocateFn = unsafe extern "C" fn(u64, *mut u64, u64, u64, u64, u32) -> KernReturn;
/// Signature of the displaced release routine. The address parameter is the
/// freed address itself, never dereferenced.
pub type FreeFn = unsafe extern "C" fn(u64, u64, u64);

/// Advisory note for allocations that fell back to the kernel region.
pub const FALLBACK_NOTE: &str = "size-segregated region full, fell back";

/// Arguments of one allocation request, as the hook receives them.
#[derive(Debug, Clone, Copy)]
pub struct AllocRequest {
    pub region: u64,
    pub addr_out: *mut u64,
    pub size: u64,
    pub mask: u64,
    pub flags: u64,
    pub tag: u32,
}

/// Arguments of one release request.
#[derive(Debug, Clone, Copy)]
pub struct FreeRequest {
    pub region: u64,
    pub addr: u64,
    pub size: u64,
}

// =============================================================================
// Return-address capture
// =============================================================================

#[cfg(all(feature = "xnuspy", target_arch = "aarch64"))]
macro_rules! raw_return_address {
    () => {{
        let ra: u64;
        // x30 still holds the caller's return address this early in the
        // frame; nothing has pushed a new one yet.
        unsafe {
            core::arch::asm!("mov {0}, x30", out(reg) ra, options(nomem, nostack, preserves_flags));
        }
        ra
    }};
}

#[cfg(not(all(feature = "xnuspy", target_arch = "aarch64")))]
macro_rules! raw_return_address {
    () => {
        $crate::hook::interceptors::mock_return_address()
    };
}

/// Mock raw return address for host builds.
#[cfg(not(all(feature = "xnuspy", target_arch = "aarch64")))]
static MOCK_RETURN_ADDRESS: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);

#[cfg(not(all(feature = "xnuspy", target_arch = "aarch64")))]
pub fn set_mock_return_address(ra: u64) {
    MOCK_RETURN_ADDRESS.store(ra, Ordering::Relaxed);
}

#[cfg(not(all(feature = "xnuspy", target_arch = "aarch64")))]
pub fn mock_return_address() -> u64 {
    MOCK_RETURN_ADDRESS.load(Ordering::Relaxed)
}

// =============================================================================
// Record emission
// =============================================================================

/// Emit one record through the kernel log capability. The record is already
/// fully formatted; `%s` indirection keeps the kernel's formatter out of it.
#[cfg(feature = "xnuspy")]
fn emit(caps: &CapabilityTable, line: &LineBuf) {
    if caps.kprintf == 0 {
        return;
    }
    // SAFETY: the table only ever holds the facility-resolved kprintf here,
    // and the buffer is NUL-terminated by construction.
    unsafe {
        let kprintf: unsafe extern "C" fn(*const core::ffi::c_char, ...) =
            core::mem::transmute(caps.kprintf);
        kprintf(c"%s\n".as_ptr(), line.as_cstr_ptr());
    }
}

/// Host builds capture records in-process instead.
#[cfg(not(feature = "xnuspy"))]
fn emit(_caps: &CapabilityTable, line: &LineBuf) {
    CAPTURED.lock().push(line.as_str().to_string());
}

#[cfg(not(feature = "xnuspy"))]
static CAPTURED: spin::Mutex<Vec<String>> = spin::Mutex::new(Vec::new());

/// Drain every record the shells have emitted so far (host builds only).
#[cfg(not(feature = "xnuspy"))]
pub fn drain_captured() -> Vec<String> {
    core::mem::take(&mut *CAPTURED.lock())
}

// =============================================================================
// Probe bodies
// =============================================================================

/// Interposed allocation path.
///
/// Forwards to the original first and only then inspects the out-pointer:
/// until the original has returned there is nothing valid behind it. The
/// result code is returned bit-for-bit; this path observes, it never steers.
pub fn allocate_probe<O, E>(
    ctx: &RuntimeContext,
    raw_return: u64,
    req: AllocRequest,
    original: O,
    emit: E,
) -> KernReturn
where
    O: FnOnce(u64, *mut u64, u64, u64, u64, u32) -> KernReturn,
    E: FnOnce(&LineBuf),
{
    let call_site = raw_return.wrapping_sub(ctx.slide);

    let ret = original(req.region, req.addr_out, req.size, req.mask, req.flags, req.tag);
    let out_addr = if req.addr_out.is_null() {
        0
    } else {
        // SAFETY: the caller's out-pointer, read only after the original
        // finished writing through it.
        unsafe { req.addr_out.read() }
    };

    let identity = ctx.caps.caller_identity();

    let verdict = classify_allocate(call_site, req.region, ctx.regions.kernel(), &ctx.offsets);
    if verdict.learn_fast {
        ctx.regions.learn_fast(req.region);
    }
    let note = if verdict.fell_back { FALLBACK_NOTE } else { "" };

    let mut line = LineBuf::new();
    let _ = write!(
        line,
        "{note:>38} | {name:>16} | caller 0x{call_site:016x} | ret {ret} | region 0x{region:016x} {label:>15} | addr 0x{out_addr:016x} size 0x{size:x} mask 0x{mask:x} flags 0x{flags:x} tag 0x{tag:x}",
        name = identity.name(),
        region = req.region,
        label = verdict.label.as_str(),
        size = req.size,
        mask = req.mask,
        flags = req.flags,
        tag = req.tag,
    );
    emit(&line);

    ret
}

/// Interposed release path.
///
/// The record goes out strictly before the original runs: once release
/// completes, the freed address is gone and even its value is not guaranteed
/// to stay meaningful. Reversing this order crashes the host environment;
/// it is a hard invariant, not a preference.
///
/// Caller identity here names whichever process context the release ran in,
/// which for kernel-internal reclaim paths is not necessarily the process
/// whose memory is being released.
pub fn free_probe<O, E>(ctx: &RuntimeContext, raw_return: u64, req: FreeRequest, original: O, emit: E)
where
    O: FnOnce(u64, u64, u64),
    E: FnOnce(&LineBuf),
{
    let call_site = raw_return.wrapping_sub(ctx.slide);
    let identity = ctx.caps.caller_identity();
    let label = classify_release(req.region, ctx.regions.kernel(), ctx.regions.fast());

    let mut line = LineBuf::new();
    let _ = write!(
        line,
        "{note:>38} | {name:>16} | caller 0x{call_site:016x} | ret | region 0x{region:016x} {label:>15} | addr 0x{addr:016x} size 0x{size:x}",
        note = "",
        name = identity.name(),
        region = req.region,
        label = label.as_str(),
        addr = req.addr,
        size = req.size,
    );
    emit(&line);

    original(req.region, req.addr, req.size);
}

// =============================================================================
// extern "C" shells
// =============================================================================

/// Replacement for the kernel allocation entry point.
pub extern "C" fn allocate_entry(
    region: u64,
    addr_out: *mut u64,
    size: u64,
    mask: u64,
    flags: u64,
    tag: u32,
) -> KernReturn {
    let raw_return = raw_return_address!();
    let Some(ctx) = context::get() else {
        return KERN_FAILURE;
    };
    let orig = ORIG_ALLOCATE.load(Ordering::Relaxed);
    if orig == 0 {
        return KERN_FAILURE;
    }

    let original = move |r, a, s, m, f, t| {
        // SAFETY: written by the facility at install time, exact signature.
        unsafe {
            let original: AllocateFn = core::mem::transmute(orig);
            original(r, a, s, m, f, t)
        }
    };

    allocate_probe(
        ctx,
        raw_return,
        AllocRequest {
            region,
            addr_out,
            size,
            mask,
            flags,
            tag,
        },
        original,
        |line| emit(&ctx.caps, line),
    )
}

/// Replacement for the kernel release entry point.
pub extern "C" fn free_entry(region: u64, addr: u64, size: u64) {
    let raw_return = raw_return_address!();
    let Some(ctx) = context::get() else {
        return;
    };
    let orig = ORIG_FREE.load(Ordering::Relaxed);
    if orig == 0 {
        // No original to forward to; nothing sane can be done with the
        // request. Unreachable once install has completed.
        return;
    }

    let original = move |r, a, s| {
        // SAFETY: written by the facility at install time, exact signature.
        unsafe {
            let original: FreeFn = core::mem::transmute(orig);
            original(r, a, s)
        }
    };

    free_probe(
        ctx,
        raw_return,
        FreeRequest { region, addr, size },
        original,
        |line| emit(&ctx.caps, line),
    );
}
