//! Per-tick parameter snapshots handed from the simulation thread to the
//! dispatch engine.

use crate::types::{FlockChannel, FlockTuning, SurfaceSize};

/// Immutable parameter bundle captured once per simulation tick.
///
/// The velocity and position handles refer to client-owned textures; this
/// crate only reads from and copies into them and never releases them. The
/// client must keep both textures alive for as long as the snapshot is the
/// scheduler's current one, and they need
/// `TEXTURE_BINDING | COPY_DST` usage so the kernel can sample them and the
/// engine can copy results back.
///
/// `cached_size` is derived exactly once here, from the velocity texture. A
/// snapshot built without a velocity texture has a zero extent and is never
/// dispatched.
#[derive(Debug, Clone)]
pub struct FlockSnapshot {
    velocity_target: Option<wgpu::Texture>,
    position_target: Option<wgpu::Texture>,
    cached_size: SurfaceSize,
    pub tuning: FlockTuning,
}

impl FlockSnapshot {
    pub fn new(
        velocity_target: Option<wgpu::Texture>,
        position_target: Option<wgpu::Texture>,
        tuning: FlockTuning,
    ) -> Self {
        let cached_size = velocity_target
            .as_ref()
            .map(SurfaceSize::of_texture)
            .unwrap_or(SurfaceSize::ZERO);
        Self {
            velocity_target,
            position_target,
            cached_size,
            tuning,
        }
    }

    /// Extent captured at construction time.
    pub fn cached_size(&self) -> SurfaceSize {
        self.cached_size
    }

    pub fn velocity_target(&self) -> Option<&wgpu::Texture> {
        self.velocity_target.as_ref()
    }

    pub fn position_target(&self) -> Option<&wgpu::Texture> {
        self.position_target.as_ref()
    }

    /// Client texture receiving the given channel's copy-back.
    pub fn target(&self, channel: FlockChannel) -> Option<&wgpu::Texture> {
        match channel {
            FlockChannel::Velocity => self.velocity_target.as_ref(),
            FlockChannel::Position => self.position_target.as_ref(),
        }
    }

    /// True when both handles are present and the captured extent is usable.
    pub(crate) fn is_dispatchable(&self) -> bool {
        self.velocity_target.is_some() && self.position_target.is_some() && !self.cached_size.is_zero()
    }
}
