//! Offline layout view over captured tracer output.
//!
//! Feed it a syslog capture taken while the tracer was running; it prints
//! the coalesced allocated/freed ranges and totals.

use std::process::ExitCode;

use kmemtrace::report::MemoryMap;

fn main() -> ExitCode {
    env_logger::init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: kmemreport <captured-log-file>");
        return ExitCode::from(1);
    };

    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            log::error!("cannot read {path}: {e}");
            return ExitCode::from(1);
        }
    };

    let mut map = MemoryMap::new();
    map.ingest(&text);
    print!("{}", map.summary());
    ExitCode::SUCCESS
}
