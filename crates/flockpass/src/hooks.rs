//! Host-renderer callback registry.
//!
//! The host render loop owns a [`CallbackRegistry`] and calls
//! [`CallbackRegistry::dispatch_frame`] exactly once per rendered frame, on
//! the render thread, with the frame's command encoder. Subsystems subscribe
//! a [`FrameHook`] through the [`FrameCallbacks`] capability and receive a
//! [`Subscription`] token that must be handed back to unsubscribe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::ThreadId;

/// Frame-scoped resources passed to every hook.
pub struct FrameContext<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub encoder: &'a mut wgpu::CommandEncoder,
    /// Identity of the thread the host dispatches frames from. Hooks with a
    /// render-thread-only contract assert against this.
    pub render_thread: ThreadId,
}

/// A per-frame callback. Invoked serially, never concurrently with itself.
pub trait FrameHook: Send + Sync {
    fn on_frame(&self, frame: &mut FrameContext<'_>);
}

/// Capability for registering per-frame hooks with the host renderer.
pub trait FrameCallbacks: Send + Sync {
    fn subscribe(&self, hook: Arc<dyn FrameHook>) -> Subscription;
    fn unsubscribe(&self, subscription: Subscription);
}

/// Proof of a live registration. Consumed by `unsubscribe`; deliberately not
/// cloneable so at most one party can cancel a given hook.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
}

impl Subscription {
    /// Mints a token. Only registries should call this; hand the token to the
    /// subscriber and honor it in `unsubscribe`.
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Concrete hook list driven by the host render loop.
pub struct CallbackRegistry {
    hooks: Mutex<Vec<(u64, Arc<dyn FrameHook>)>>,
    next_id: AtomicU64,
    render_thread: OnceLock<ThreadId>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            render_thread: OnceLock::new(),
        }
    }

    /// Invokes every subscribed hook once, in subscription order.
    ///
    /// Must be called from the host's render thread; the thread observed on
    /// the first dispatch is recorded and handed to hooks for their own
    /// precondition checks.
    pub fn dispatch_frame(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
    ) {
        let render_thread = *self
            .render_thread
            .get_or_init(|| std::thread::current().id());

        // Snapshot the hook list so a hook may subscribe/unsubscribe without
        // deadlocking against the dispatch.
        let hooks: Vec<Arc<dyn FrameHook>> = {
            let guard = self.hooks.lock().expect("hook list poisoned");
            guard.iter().map(|(_, hook)| Arc::clone(hook)).collect()
        };

        for hook in hooks {
            let mut frame = FrameContext {
                device,
                queue,
                encoder: &mut *encoder,
                render_thread,
            };
            hook.on_frame(&mut frame);
        }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.lock().expect("hook list poisoned").len()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCallbacks for CallbackRegistry {
    fn subscribe(&self, hook: Arc<dyn FrameHook>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.hooks
            .lock()
            .expect("hook list poisoned")
            .push((id, hook));
        tracing::debug!(id, "frame hook subscribed");
        Subscription { id }
    }

    fn unsubscribe(&self, subscription: Subscription) {
        let mut hooks = self.hooks.lock().expect("hook list poisoned");
        let before = hooks.len();
        hooks.retain(|(id, _)| *id != subscription.id);
        if hooks.len() == before {
            tracing::warn!(id = subscription.id, "unsubscribe for unknown frame hook");
        } else {
            tracing::debug!(id = subscription.id, "frame hook unsubscribed");
        }
    }
}
