//! Render-thread dispatch engine.
//!
//! The engine is the per-frame hook the lifecycle manager subscribes to the
//! host registry. Each frame it reads the most recently published snapshot,
//! provisions the pooled output surfaces, transitions them to a
//! compute-writable state, records one kernel dispatch per channel, and
//! copies the results back into the client-owned textures. Every failure
//! past the thread precondition is recoverable: log, skip, and let the next
//! frame retry.

use std::sync::Arc;

use crate::hooks::{FrameContext, FrameHook};
use crate::manager::{EngineShared, StatsCounters};
use crate::snapshot::FlockSnapshot;
use crate::types::{FlockChannel, SurfaceSize};

pub(crate) mod kernel;
pub(crate) mod outputs;

use kernel::KernelPipelines;
use outputs::OutputSurfaces;

/// Pipelines and pooled surfaces cached across frames. Lives behind the
/// shared mutex but is only ever touched by the render thread.
pub(crate) struct RenderState {
    kernels: Option<KernelPipelines>,
    outputs: OutputSurfaces,
}

impl RenderState {
    pub(crate) fn new() -> Self {
        Self {
            kernels: None,
            outputs: OutputSurfaces::default(),
        }
    }
}

pub(crate) struct DispatchEngine {
    shared: Arc<EngineShared>,
}

impl DispatchEngine {
    pub(crate) fn new(shared: Arc<EngineShared>) -> Self {
        Self { shared }
    }
}

impl FrameHook for DispatchEngine {
    fn on_frame(&self, frame: &mut FrameContext<'_>) {
        // Wrong-thread invocation is an integration bug, not a runtime
        // condition; fail loudly.
        assert_eq!(
            std::thread::current().id(),
            frame.render_thread,
            "flock dispatch invoked off the render thread"
        );

        let stats = &self.shared.stats;
        stats.frame_seen();

        let Some(snapshot) = self.shared.params.latest() else {
            tracing::warn!("no cached flock parameters; skipping dispatch");
            stats.frame_skipped();
            return;
        };
        if !snapshot.is_dispatchable() {
            tracing::warn!(
                width = snapshot.cached_size().width,
                height = snapshot.cached_size().height,
                "invalid cached parameters or missing render target; skipping dispatch"
            );
            stats.frame_skipped();
            return;
        }

        let mut render = self.shared.render.lock().expect("render state poisoned");
        let RenderState { kernels, outputs } = &mut *render;

        let kernels = kernels.get_or_insert_with(|| {
            tracing::debug!("compiling flock kernel pipelines");
            KernelPipelines::new(frame.device)
        });

        let size = snapshot.cached_size();

        // Provision both channels before recording any work. An allocation
        // failure aborts the frame; surfaces already cached stay cached.
        for channel in FlockChannel::ALL {
            let Some(input) = snapshot.target(channel) else {
                tracing::warn!(
                    channel = channel.name(),
                    "client texture missing; skipping dispatch"
                );
                stats.frame_skipped();
                return;
            };
            if let Err(error) = outputs.provision(frame.device, channel, input, size, stats) {
                tracing::error!(
                    channel = channel.name(),
                    %error,
                    "output surface provisioning failed; aborting frame"
                );
                stats.frame_skipped();
                return;
            }
        }

        // The compute-writable transition is required every frame for hazard
        // tracking, not only after allocation.
        let transitions: Vec<wgpu::TextureTransition<&wgpu::Texture>> = FlockChannel::ALL
            .iter()
            .filter_map(|&channel| outputs.get(channel))
            .map(|surface| wgpu::TextureTransition {
                texture: &surface.texture,
                selector: None,
                state: wgpu::TextureUses::STORAGE_WRITE_ONLY,
            })
            .collect();
        frame.encoder.transition_resources(
            std::iter::empty::<wgpu::BufferTransition<&wgpu::Buffer>>(),
            transitions.into_iter(),
        );

        kernels.write_params(frame.queue, &snapshot);

        let velocity_view = snapshot
            .velocity_target()
            .map(|texture| texture.create_view(&wgpu::TextureViewDescriptor::default()));
        let position_view = snapshot
            .position_target()
            .map(|texture| texture.create_view(&wgpu::TextureViewDescriptor::default()));
        let (Some(velocity_view), Some(position_view)) = (velocity_view, position_view) else {
            tracing::warn!("input texture view missing; skipping dispatch");
            stats.frame_skipped();
            return;
        };

        // All kernels are recorded before any copy-back so the position pass
        // reads the frame's original inputs rather than freshly copied
        // velocity results. Channels stay independent: a skipped kernel or
        // copy in one never blocks the other.
        let mut dispatched = [false; FlockChannel::ALL.len()];
        for (index, &channel) in FlockChannel::ALL.iter().enumerate() {
            dispatched[index] = dispatch_channel(
                kernels,
                outputs,
                frame,
                channel,
                &velocity_view,
                &position_view,
                size,
                stats,
            );
        }
        for (index, &channel) in FlockChannel::ALL.iter().enumerate() {
            if dispatched[index] {
                copy_back(outputs, frame, &snapshot, channel, stats);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch_channel(
    kernels: &KernelPipelines,
    outputs: &OutputSurfaces,
    frame: &mut FrameContext<'_>,
    channel: FlockChannel,
    velocity_view: &wgpu::TextureView,
    position_view: &wgpu::TextureView,
    size: SurfaceSize,
    stats: &StatsCounters,
) -> bool {
    let Some(surface) = outputs.get(channel) else {
        tracing::warn!(
            channel = channel.name(),
            "output surface unavailable; skipping kernel"
        );
        return false;
    };

    let bind_group = kernels.bind(frame.device, velocity_view, position_view, &surface.view);
    let (groups_x, groups_y, groups_z) = kernel::dispatch_groups(size);

    {
        let mut pass = frame
            .encoder
            .begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(channel.debug_label()),
                timestamp_writes: None,
            });
        pass.set_pipeline(kernels.pipeline(channel));
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups_x, groups_y, groups_z);
    }

    stats.kernel_dispatched();
    tracing::trace!(
        channel = channel.name(),
        groups_x,
        groups_y,
        "recorded flock kernel dispatch"
    );
    true
}

fn copy_back(
    outputs: &OutputSurfaces,
    frame: &mut FrameContext<'_>,
    snapshot: &FlockSnapshot,
    channel: FlockChannel,
    stats: &StatsCounters,
) {
    let Some(surface) = outputs.get(channel) else {
        return;
    };
    let Some(client) = snapshot.target(channel) else {
        tracing::warn!(
            channel = channel.name(),
            "client texture missing; skipping copy-back"
        );
        return;
    };

    let live = SurfaceSize::of_texture(client);
    if live != surface.size {
        tracing::warn!(
            channel = channel.name(),
            expected_width = surface.size.width,
            expected_height = surface.size.height,
            actual_width = live.width,
            actual_height = live.height,
            "client texture size diverged from snapshot; skipping copy-back"
        );
        return;
    }
    if !client.usage().contains(wgpu::TextureUsages::COPY_DST) {
        tracing::warn!(
            channel = channel.name(),
            "client texture lacks COPY_DST usage; skipping copy-back"
        );
        return;
    }

    frame.encoder.copy_texture_to_texture(
        surface.texture.as_image_copy(),
        client.as_image_copy(),
        wgpu::Extent3d {
            width: surface.size.width,
            height: surface.size.height,
            depth_or_array_layers: 1,
        },
    );
    stats.copy_back();
    tracing::trace!(channel = channel.name(), "recorded copy-back");
}
