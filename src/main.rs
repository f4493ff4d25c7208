//! Tracer entry point: negotiate, resolve, install, then idle forever.

use std::process::ExitCode;

use kmemtrace::config;

fn main() -> ExitCode {
    env_logger::init();

    let build_name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_BUILD.to_string());
    let Some(build) = config::find_build(&build_name) else {
        log::error!("no offsets for kernel build {build_name}");
        for known in config::KNOWN_BUILDS {
            log::error!("known build: {}", known.name);
        }
        return ExitCode::from(1);
    };

    run(build)
}

#[cfg(all(feature = "xnuspy", any(target_os = "macos", target_os = "ios")))]
fn run(build: &config::KernelBuild) -> ExitCode {
    let control = match kmemtrace::control::XnuspyControl::discover() {
        Ok(control) => control,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = kmemtrace::setup(&control, build.offsets) {
        log::error!("{e}");
        return ExitCode::from(1);
    }

    log::info!("tracing {}; records go to the kernel log", build.name);
    // The interceptors live in this process image; exiting would tear them
    // out from under the kernel. Idle forever instead.
    loop {
        std::thread::park();
    }
}

#[cfg(not(all(feature = "xnuspy", any(target_os = "macos", target_os = "ios"))))]
fn run(build: &config::KernelBuild) -> ExitCode {
    let _ = build;
    log::error!("built without xnuspy support; tracing requires a device build");
    ExitCode::from(1)
}
