//! Lifecycle manager: registration state machine and thread-safe parameter
//! publication.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::gpu::{DispatchEngine, RenderState};
use crate::hooks::{FrameCallbacks, Subscription};
use crate::snapshot::FlockSnapshot;

/// Single-slot safe-publish cell for the current snapshot.
///
/// The simulation thread swaps in a fully constructed `Arc`; the render
/// thread clones the `Arc` out under a short lock. A reader can never observe
/// a partially written snapshot, and keeps reusing the same one until a newer
/// publish lands.
pub(crate) struct ParamCell {
    slot: Mutex<Option<Arc<FlockSnapshot>>>,
}

impl ParamCell {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub(crate) fn publish(&self, snapshot: FlockSnapshot) {
        *self.slot.lock().expect("parameter cell poisoned") = Some(Arc::new(snapshot));
    }

    pub(crate) fn latest(&self) -> Option<Arc<FlockSnapshot>> {
        self.slot.lock().expect("parameter cell poisoned").clone()
    }
}

/// Counters recording dispatch outcomes. Logs remain the only error surface;
/// these exist so hosts and tests can observe allocation and dispatch
/// behaviour without GPU readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub frames_seen: u64,
    pub frames_skipped: u64,
    pub surfaces_allocated: u64,
    pub kernel_dispatches: u64,
    pub copy_backs: u64,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    frames_seen: AtomicU64,
    frames_skipped: AtomicU64,
    surfaces_allocated: AtomicU64,
    kernel_dispatches: AtomicU64,
    copy_backs: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn frame_seen(&self) {
        self.frames_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn surface_allocated(&self) {
        self.surfaces_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn kernel_dispatched(&self) {
        self.kernel_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn copy_back(&self) {
        self.copy_backs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            surfaces_allocated: self.surfaces_allocated.load(Ordering::Relaxed),
            kernel_dispatches: self.kernel_dispatches.load(Ordering::Relaxed),
            copy_backs: self.copy_backs.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the scheduler (simulation thread) and the dispatch
/// engine (render thread).
pub(crate) struct EngineShared {
    pub(crate) params: ParamCell,
    pub(crate) stats: StatsCounters,
    /// Pipelines and pooled output surfaces. Touched only from the render
    /// thread; the mutex satisfies `Sync` for the hook trait object.
    pub(crate) render: Mutex<RenderState>,
}

/// Registration state machine: `Idle` ⇄ `Active`, nothing else.
enum Registration {
    Idle,
    Active(Subscription),
}

/// Schedules the flocking compute kernels once per rendered frame.
///
/// An explicit service object: construct one per subsystem with a handle to
/// the host's callback registry and share it with whichever gameplay code
/// needs to push parameters. `begin`/`end` drive registration from the
/// simulation thread; the render thread only ever runs the dispatch engine
/// hook.
pub struct FlockScheduler {
    registry: Arc<dyn FrameCallbacks>,
    shared: Arc<EngineShared>,
    registration: Registration,
}

impl FlockScheduler {
    pub fn new(registry: Arc<dyn FrameCallbacks>) -> Self {
        Self {
            registry,
            shared: Arc::new(EngineShared {
                params: ParamCell::new(),
                stats: StatsCounters::default(),
                render: Mutex::new(RenderState::new()),
            }),
            registration: Registration::Idle,
        }
    }

    /// Hooks the dispatch engine onto the renderer and stores the initial
    /// snapshot. A no-op while already registered: repeated `begin` neither
    /// double-registers nor updates parameters.
    pub fn begin(&mut self, snapshot: FlockSnapshot) {
        match self.registration {
            Registration::Active(_) => {
                tracing::debug!("begin ignored; dispatch engine already registered");
            }
            Registration::Idle => {
                self.shared.params.publish(snapshot);
                let hook = Arc::new(DispatchEngine::new(Arc::clone(&self.shared)));
                let subscription = self.registry.subscribe(hook);
                self.registration = Registration::Active(subscription);
                tracing::debug!("dispatch engine registered for per-frame execution");
            }
        }
    }

    /// Stops per-frame execution. Idempotent; GPU work already recorded for
    /// the current frame is not cancelled.
    pub fn end(&mut self) {
        match std::mem::replace(&mut self.registration, Registration::Idle) {
            Registration::Active(subscription) => {
                self.registry.unsubscribe(subscription);
                tracing::debug!("dispatch engine unregistered");
            }
            Registration::Idle => {
                tracing::debug!("end ignored; dispatch engine not registered");
            }
        }
    }

    /// Publishes a new snapshot for the next frame. Callable from any thread;
    /// performs no GPU work. While `Idle` the update is stored but has no
    /// visible effect until `begin` is called.
    pub fn update_parameters(&self, snapshot: FlockSnapshot) {
        self.shared.params.publish(snapshot);
    }

    pub fn is_active(&self) -> bool {
        matches!(self.registration, Registration::Active(_))
    }

    pub fn stats(&self) -> DispatchStats {
        self.shared.stats.snapshot()
    }
}

impl Drop for FlockScheduler {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::FrameHook;
    use crate::types::FlockTuning;
    use std::sync::atomic::AtomicUsize;

    /// Fake registry that only counts live registrations.
    #[derive(Default)]
    struct CountingRegistry {
        live: AtomicUsize,
        total_subscribes: AtomicUsize,
        next_id: AtomicU64,
    }

    impl FrameCallbacks for CountingRegistry {
        fn subscribe(&self, _hook: Arc<dyn FrameHook>) -> Subscription {
            self.live.fetch_add(1, Ordering::SeqCst);
            self.total_subscribes.fetch_add(1, Ordering::SeqCst);
            Subscription::new(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        fn unsubscribe(&self, _subscription: Subscription) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn empty_snapshot() -> FlockSnapshot {
        FlockSnapshot::new(None, None, FlockTuning::default())
    }

    #[test]
    fn begin_is_idempotent() {
        let registry = Arc::new(CountingRegistry::default());
        let mut scheduler = FlockScheduler::new(registry.clone());
        scheduler.begin(empty_snapshot());
        scheduler.begin(empty_snapshot());
        scheduler.begin(empty_snapshot());
        assert!(scheduler.is_active());
        assert_eq!(registry.live.load(Ordering::SeqCst), 1);
        assert_eq!(registry.total_subscribes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn end_is_idempotent() {
        let registry = Arc::new(CountingRegistry::default());
        let mut scheduler = FlockScheduler::new(registry.clone());
        scheduler.end();
        assert_eq!(registry.live.load(Ordering::SeqCst), 0);
        scheduler.begin(empty_snapshot());
        scheduler.end();
        scheduler.end();
        assert!(!scheduler.is_active());
        assert_eq!(registry.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn begin_end_begin_registers_again() {
        let registry = Arc::new(CountingRegistry::default());
        let mut scheduler = FlockScheduler::new(registry.clone());
        scheduler.begin(empty_snapshot());
        scheduler.end();
        scheduler.begin(empty_snapshot());
        assert!(scheduler.is_active());
        assert_eq!(registry.live.load(Ordering::SeqCst), 1);
        assert_eq!(registry.total_subscribes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drop_releases_registration() {
        let registry = Arc::new(CountingRegistry::default());
        {
            let mut scheduler = FlockScheduler::new(registry.clone());
            scheduler.begin(empty_snapshot());
        }
        assert_eq!(registry.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn update_parameters_replaces_latest_snapshot() {
        let cell = ParamCell::new();
        let mut tuning = FlockTuning::default();
        tuning.range = 2.0;
        cell.publish(FlockSnapshot::new(None, None, tuning));
        tuning.range = 7.5;
        cell.publish(FlockSnapshot::new(None, None, tuning));
        let latest = cell.latest().expect("snapshot published");
        assert_eq!(latest.tuning.range, 7.5);
    }

    #[test]
    fn latest_is_stable_between_publishes() {
        let cell = ParamCell::new();
        cell.publish(FlockSnapshot::new(None, None, FlockTuning::default()));
        let first = cell.latest().expect("snapshot published");
        let second = cell.latest().expect("snapshot published");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
