//! Post-processing of captured trace records.
//!
//! Turns raw tracer output (syslog capture, or the host-build record sink)
//! back into allocation events, tracks every block by address, and coalesces
//! contiguous same-state blocks into ranges so a grooming session can be
//! watched as a layout instead of a scroll of lines. Plain host-side
//! tooling; none of the interceptor constraints apply here.

use std::collections::BTreeMap;

/// Which entry point produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Allocate,
    Free,
}

/// One parsed record; only the fields the layout view needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    pub addr: u64,
    pub size: u64,
}

fn hex_field(line: &str, tag: &str) -> Option<u64> {
    let start = line.find(tag)? + tag.len();
    let rest = &line[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(rest.len());
    u64::from_str_radix(&rest[..end], 16).ok()
}

/// Parse one tracer record. Returns `None` for lines that are not records
/// (kernel log noise interleaves freely with tracer output).
///
/// Allocate and free records share the `addr`/`size` fields; only allocate
/// records carry a `mask` field, which is what tells them apart.
pub fn parse_record(line: &str) -> Option<Record> {
    let addr = hex_field(line, "addr 0x")?;
    let size = hex_field(line, "size 0x")?;
    let kind = if line.contains("mask 0x") {
        RecordKind::Allocate
    } else {
        RecordKind::Free
    };
    Some(Record { kind, addr, size })
}

#[derive(Debug, Clone, Copy)]
struct Block {
    end: u64,
    live: bool,
}

/// A coalesced run of contiguous same-state blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: u64,
    pub end: u64,
    pub live: bool,
    /// Number of blocks merged into this range.
    pub chunks: usize,
}

/// Address-ordered view of every block the trace has mentioned.
#[derive(Debug, Default)]
pub struct MemoryMap {
    blocks: BTreeMap<u64, Block>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one record. Allocations with a null address (allocator gave up)
    /// are dropped; frees of unseen addresses are dropped, matching what a
    /// partial capture can know.
    pub fn apply(&mut self, rec: &Record) {
        match rec.kind {
            RecordKind::Allocate => {
                if rec.addr != 0 {
                    self.blocks.insert(
                        rec.addr,
                        Block {
                            // Saturate: a record at the top of the address
                            // space must not wrap into end < start.
                            end: rec.addr.saturating_add(rec.size),
                            live: true,
                        },
                    );
                }
            }
            RecordKind::Free => {
                if let Some(block) = self.blocks.get_mut(&rec.addr) {
                    block.live = false;
                    block.end = rec.addr.saturating_add(rec.size);
                }
            }
        }
    }

    /// Feed every record found in `text`.
    pub fn ingest(&mut self, text: &str) {
        for line in text.lines() {
            if let Some(rec) = parse_record(line) {
                self.apply(&rec);
            }
        }
    }

    /// Contiguous same-state ranges, in address order.
    pub fn ranges(&self) -> Vec<Range> {
        let mut out: Vec<Range> = Vec::new();
        for (&start, block) in &self.blocks {
            match out.last_mut() {
                Some(range) if range.end == start && range.live == block.live => {
                    range.end = block.end;
                    range.chunks += 1;
                }
                _ => out.push(Range {
                    start,
                    end: block.end,
                    live: block.live,
                    chunks: 1,
                }),
            }
        }
        out
    }

    /// Total live and freed bytes currently tracked.
    pub fn totals(&self) -> (u64, u64) {
        let mut live = 0;
        let mut freed = 0;
        for (&start, block) in &self.blocks {
            let len = block.end.saturating_sub(start);
            if block.live {
                live += len;
            } else {
                freed += len;
            }
        }
        (live, freed)
    }

    /// Render the layout the way a grooming session wants to read it.
    pub fn summary(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        for range in self.ranges() {
            let state = if range.live { "[alloc]" } else { "[ free]" };
            let _ = writeln!(
                out,
                "{state} start 0x{:016x} end 0x{:016x} ({} in {} chunks)",
                range.start,
                range.end,
                human_size(range.end.saturating_sub(range.start)),
                range.chunks,
            );
        }
        let (live, freed) = self.totals();
        let _ = writeln!(out, "total live {}, total freed {}", human_size(live), human_size(freed));
        out
    }
}

/// Pretty-print a byte count.
pub fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
