//! Integration tests for the probe bodies.
//!
//! Exercises the observation protocol without any privileged call: fake
//! originals and a recording sink stand in for the kernel.

#![cfg(not(feature = "xnuspy"))]

use std::cell::RefCell;

use kmemtrace::capabilities::CapabilityTable;
use kmemtrace::config::KernelOffsets;
use kmemtrace::context::RuntimeContext;
use kmemtrace::hook::interceptors::{
    AllocRequest, FALLBACK_NOTE, FreeRequest, allocate_probe, free_probe,
};

const SLIDE: u64 = 0x1C00_4000;
const KERNEL_MAP: u64 = 0xFFFF_FFF7_09AB_C010;
const FAST_MAP: u64 = 0xFFFF_FFF7_0000_0420;
const SELECT_SITE: u64 = 0xFFFF_FFF0_07A9_2174;
const FALLBACK_SITE: u64 = 0xFFFF_FFF0_07A9_21C4;

fn offsets() -> KernelOffsets {
    KernelOffsets {
        allocate_entry: 0xFFFF_FFF0_07B2_666C,
        free_entry: 0xFFFF_FFF0_07B2_8478,
        region_select_site: SELECT_SITE,
        region_fallback_site: FALLBACK_SITE,
    }
}

/// Context whose identity lookup degrades (no capability functions); the
/// capability table's own resolution path is covered by its unit tests.
fn quiet_ctx() -> RuntimeContext {
    let caps = CapabilityTable {
        kprintf: 0,
        current_proc: 0,
        proc_pid: 0,
        proc_name: 0,
        kernel_map: KERNEL_MAP,
    };
    RuntimeContext::new(SLIDE, caps, offsets())
}

fn alloc_req(region: u64, addr_out: *mut u64) -> AllocRequest {
    AllocRequest {
        region,
        addr_out,
        size: 0x4000,
        mask: 0x3FFF,
        flags: 0,
        tag: 1,
    }
}

// =============================================================================
// Observational transparency
// =============================================================================

#[test]
fn test_allocate_result_passthrough() {
    let ctx = quiet_ctx();
    let mut out: u64 = 0;

    for code in [0, 3, -1] {
        let ret = allocate_probe(
            &ctx,
            SLIDE + 0x1234,
            alloc_req(KERNEL_MAP, &mut out),
            |_, _, _, _, _, _| code,
            |_| {},
        );
        assert_eq!(ret, code);
    }
}

#[test]
fn test_allocate_reads_out_address_written_by_original() {
    let ctx = quiet_ctx();
    let mut out: u64 = 0;
    let line = RefCell::new(String::new());

    let ret = allocate_probe(
        &ctx,
        SLIDE + 0x1234,
        alloc_req(KERNEL_MAP, &mut out),
        |_, addr_out, _, _, _, _| {
            unsafe { *addr_out = 0x1600_4000 };
            0
        },
        |buf| *line.borrow_mut() = buf.as_str().to_string(),
    );

    assert_eq!(ret, 0);
    assert_eq!(out, 0x1600_4000);
    let line = line.into_inner();
    assert!(line.contains("addr 0x0000000016004000"), "{line}");
    assert!(line.contains("size 0x4000"), "{line}");
    assert!(line.contains("mask 0x3fff"), "{line}");
}

#[test]
fn test_allocate_forwards_before_observing() {
    let ctx = quiet_ctx();
    let mut out: u64 = 0;
    let events = RefCell::new(Vec::new());

    allocate_probe(
        &ctx,
        SLIDE + 0x1234,
        alloc_req(KERNEL_MAP, &mut out),
        |_, _, _, _, _, _| {
            events.borrow_mut().push("original");
            0
        },
        |_| events.borrow_mut().push("emit"),
    );

    assert_eq!(*events.borrow(), ["original", "emit"]);
}

// =============================================================================
// Free-path ordering
// =============================================================================

#[test]
fn test_free_emits_strictly_before_forwarding() {
    let ctx = quiet_ctx();
    let events = RefCell::new(Vec::new());

    free_probe(
        &ctx,
        SLIDE + 0x5678,
        FreeRequest {
            region: KERNEL_MAP,
            addr: 0x1600_4000,
            size: 0x4000,
        },
        |_, _, _| events.borrow_mut().push("original"),
        |_| events.borrow_mut().push("emit"),
    );

    assert_eq!(*events.borrow(), ["emit", "original"]);
}

#[test]
fn test_free_forwards_arguments_unchanged() {
    let ctx = quiet_ctx();
    let seen = RefCell::new((0u64, 0u64, 0u64));

    free_probe(
        &ctx,
        SLIDE + 0x5678,
        FreeRequest {
            region: KERNEL_MAP,
            addr: 0x1600_4000,
            size: 0x4000,
        },
        |region, addr, size| *seen.borrow_mut() = (region, addr, size),
        |_| {},
    );

    assert_eq!(*seen.borrow(), (KERNEL_MAP, 0x1600_4000, 0x4000));
}

// =============================================================================
// Classification and region learning
// =============================================================================

#[test]
fn test_selection_site_teaches_fast_region() {
    let ctx = quiet_ctx();
    let mut out: u64 = 0;
    let line = RefCell::new(String::new());

    allocate_probe(
        &ctx,
        SELECT_SITE.wrapping_add(SLIDE),
        alloc_req(FAST_MAP, &mut out),
        |_, _, _, _, _, _| 0,
        |buf| *line.borrow_mut() = buf.as_str().to_string(),
    );

    assert_eq!(ctx.regions.fast(), FAST_MAP);
    assert!(line.into_inner().contains("size-segregated"));
}

#[test]
fn test_free_labels_learned_fast_region() {
    let ctx = quiet_ctx();
    let mut out: u64 = 0;

    allocate_probe(
        &ctx,
        SELECT_SITE.wrapping_add(SLIDE),
        alloc_req(FAST_MAP, &mut out),
        |_, _, _, _, _, _| 0,
        |_| {},
    );

    let line = RefCell::new(String::new());
    free_probe(
        &ctx,
        SLIDE + 0x5678,
        FreeRequest {
            region: FAST_MAP,
            addr: 0x1600_4000,
            size: 0x4000,
        },
        |_, _, _| {},
        |buf| *line.borrow_mut() = buf.as_str().to_string(),
    );

    assert!(line.into_inner().contains("size-segregated"));
}

#[test]
fn test_kernel_region_label_on_both_paths() {
    let ctx = quiet_ctx();
    let mut out: u64 = 0;

    let alloc_line = RefCell::new(String::new());
    allocate_probe(
        &ctx,
        SLIDE + 0x1234,
        alloc_req(KERNEL_MAP, &mut out),
        |_, _, _, _, _, _| 0,
        |buf| *alloc_line.borrow_mut() = buf.as_str().to_string(),
    );
    assert!(alloc_line.into_inner().contains("kernel-region"));

    let free_line = RefCell::new(String::new());
    free_probe(
        &ctx,
        SLIDE + 0x5678,
        FreeRequest {
            region: KERNEL_MAP,
            addr: 0x1600_4000,
            size: 0x4000,
        },
        |_, _, _| {},
        |buf| *free_line.borrow_mut() = buf.as_str().to_string(),
    );
    assert!(free_line.into_inner().contains("kernel-region"));
}

#[test]
fn test_unknown_region_gets_blank_label() {
    let ctx = quiet_ctx();
    let mut out: u64 = 0;
    let line = RefCell::new(String::new());

    allocate_probe(
        &ctx,
        SLIDE + 0x1234,
        alloc_req(0xBEEF, &mut out),
        |_, _, _, _, _, _| 0,
        |buf| *line.borrow_mut() = buf.as_str().to_string(),
    );

    let line = line.into_inner();
    assert!(!line.contains("kernel-region"), "{line}");
    assert!(!line.contains("size-segregated"), "{line}");
}

#[test]
fn test_fallback_site_attaches_advisory_note() {
    let ctx = quiet_ctx();
    let mut out: u64 = 0;
    let line = RefCell::new(String::new());

    allocate_probe(
        &ctx,
        FALLBACK_SITE.wrapping_add(SLIDE),
        alloc_req(KERNEL_MAP, &mut out),
        |_, _, _, _, _, _| 0,
        |buf| *line.borrow_mut() = buf.as_str().to_string(),
    );

    let line = line.into_inner();
    assert!(line.contains(FALLBACK_NOTE), "{line}");
    assert!(line.contains("kernel-region"), "{line}");
}

// =============================================================================
// Slide handling and caller identity
// =============================================================================

#[test]
fn test_call_site_is_slide_adjusted() {
    let ctx = quiet_ctx();
    let mut out: u64 = 0;
    let line = RefCell::new(String::new());

    allocate_probe(
        &ctx,
        SLIDE + 0x1234,
        alloc_req(KERNEL_MAP, &mut out),
        |_, _, _, _, _, _| 0,
        |buf| *line.borrow_mut() = buf.as_str().to_string(),
    );

    assert!(line.into_inner().contains("caller 0x0000000000001234"));
}

extern "C" fn fake_current_proc() -> u64 {
    0xC0FFEE
}

extern "C" fn fake_proc_pid(_proc_handle: u64) -> i32 {
    77
}

extern "C" fn fake_proc_name(_pid: i32, buf: *mut u8, len: i32) {
    let name = b"kernel_task\0";
    let n = name.len().min(len as usize);
    unsafe { std::ptr::copy_nonoverlapping(name.as_ptr(), buf, n) };
}

#[test]
fn test_caller_name_appears_in_record() {
    let caps = CapabilityTable {
        kprintf: 0,
        current_proc: fake_current_proc as usize as u64,
        proc_pid: fake_proc_pid as usize as u64,
        proc_name: fake_proc_name as usize as u64,
        kernel_map: KERNEL_MAP,
    };
    let ctx = RuntimeContext::new(SLIDE, caps, offsets());
    let mut out: u64 = 0;
    let line = RefCell::new(String::new());

    allocate_probe(
        &ctx,
        SLIDE + 0x1234,
        alloc_req(KERNEL_MAP, &mut out),
        |_, _, _, _, _, _| 0,
        |buf| *line.borrow_mut() = buf.as_str().to_string(),
    );

    assert!(line.into_inner().contains("kernel_task"));
}
