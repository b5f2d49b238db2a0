//! Per-frame GPU flocking kernels behind a small lifecycle manager.
//!
//! The crate wires three moving parts together:
//!
//! - [`FlockScheduler`] is the client-facing lifecycle manager. `begin` hooks
//!   the dispatch engine onto the host's frame callbacks, `update_parameters`
//!   publishes a fresh [`FlockSnapshot`], `end` (or drop) unhooks.
//! - [`CallbackRegistry`] is a host-side registry implementing the
//!   [`FrameCallbacks`] capability; the host render loop drives it once per
//!   frame with the frame's command encoder.
//! - The internal dispatch engine runs on the render thread: it provisions
//!   pooled output surfaces, transitions them to a compute-writable state,
//!   records one kernel dispatch per channel, and copies results back into
//!   the client-owned velocity and position textures.
//!
//! Everything past `begin` is fire-and-forget: runtime failures are logged
//! through `tracing` and the affected frame or channel is skipped, never
//! surfaced to the caller. [`FlockScheduler::stats`] exposes counters for
//! hosts that want to observe dispatch behaviour.

mod gpu;
mod hooks;
mod manager;
mod snapshot;
mod types;

pub use gpu::kernel::{
    dispatch_groups, COVERAGE_PER_GROUP, DISPATCH_DEPTH, GROUP_SIZE, KERNEL_FORMAT,
    PIXELS_PER_THREAD,
};
pub use hooks::{CallbackRegistry, FrameCallbacks, FrameContext, FrameHook, Subscription};
pub use manager::{DispatchStats, FlockScheduler};
pub use snapshot::FlockSnapshot;
pub use types::{FlockChannel, FlockTuning, SurfaceSize};
