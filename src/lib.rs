//! kmemtrace — kernel allocation tracing through a privileged hook facility.
//!
//! Redirects the kernel's generic allocation and release entry points to
//! interposed handlers that record each call's arguments, resolve the calling
//! process, classify the backing allocation region, and forward to the
//! original implementation unchanged. Observable behavior of the kernel is
//! untouched apart from the added log records.
//!
//! # Setup order
//!
//! 1. [`bootstrap::negotiate`] — verify the facility is present, fetch the
//!    kernel slide.
//! 2. [`capabilities::load`] — resolve the five capability functions the
//!    interceptors are allowed to call.
//! 3. [`context::publish`] — freeze slide, capabilities, and offsets into
//!    the process-wide context.
//! 4. [`hook::install_hooks`] — redirect the two entry points.
//!
//! Any failure is fatal before step 4 completes; after that the interceptors
//! are designed never to fail. [`setup`] runs the whole sequence.
//!
//! # Quick start
//!
//! ```ignore
//! let control = kmemtrace::control::XnuspyControl::discover()?;
//! let build = kmemtrace::config::find_build("iphone10,3-14.6").unwrap();
//! kmemtrace::setup(&control, build.offsets)?;
//! loop { std::thread::park() } // records now land in the kernel log
//! ```

pub mod bootstrap;
pub mod capabilities;
pub mod config;
pub mod context;
pub mod control;
pub mod hook;
pub mod report;

// Re-export key types for convenience
pub use bootstrap::BootstrapError;
pub use capabilities::{CapabilityError, CapabilityTable};
pub use config::{KernelBuild, KernelOffsets, find_build};
pub use context::RuntimeContext;
pub use control::{CacheKey, ControlOps};
pub use hook::InstallError;

/// Any failure on the one-shot setup path. All of these abort the process
/// before a single hook is live; there is no partial-install state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    Bootstrap(BootstrapError),
    Capability(CapabilityError),
    Context(context::ContextError),
    Install(InstallError),
}

impl core::fmt::Display for SetupError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bootstrap(e) => write!(f, "bootstrap failed: {e}"),
            Self::Capability(e) => write!(f, "capability load failed: {e}"),
            Self::Context(e) => write!(f, "context publish failed: {e}"),
            Self::Install(e) => write!(f, "hook install failed: {e}"),
        }
    }
}

impl core::error::Error for SetupError {}

impl From<BootstrapError> for SetupError {
    fn from(e: BootstrapError) -> Self {
        Self::Bootstrap(e)
    }
}

impl From<CapabilityError> for SetupError {
    fn from(e: CapabilityError) -> Self {
        Self::Capability(e)
    }
}

impl From<context::ContextError> for SetupError {
    fn from(e: context::ContextError) -> Self {
        Self::Context(e)
    }
}

impl From<InstallError> for SetupError {
    fn from(e: InstallError) -> Self {
        Self::Install(e)
    }
}

/// Run the full setup sequence against the given control surface and offset
/// set. Not reentrant; a second call fails at the context-publish step.
pub fn setup<C: ControlOps>(ops: &C, offsets: KernelOffsets) -> Result<(), SetupError> {
    let slide = bootstrap::negotiate(ops)?;
    let caps = capabilities::load(ops)?;
    context::publish(RuntimeContext::new(slide, caps, offsets))?;
    hook::install_hooks(ops)?;
    Ok(())
}
