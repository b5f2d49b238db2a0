//! Pooled per-channel output surfaces.

use crate::manager::StatsCounters;
use crate::types::{FlockChannel, SurfaceSize};

use super::kernel::KERNEL_FORMAT;

/// Recoverable provisioning failures. Logged and absorbed by the dispatch
/// engine; never surfaced to client code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ProvisionError {
    #[error("output extent {width}x{height} exceeds device texture limit {limit}")]
    ExtentTooLarge { width: u32, height: u32, limit: u32 },
    #[error("input texture format {actual:?} does not match the kernel's fixed format {expected:?}")]
    FormatMismatch {
        actual: wgpu::TextureFormat,
        expected: wgpu::TextureFormat,
    },
}

/// A reusable compute-writable texture for one channel.
pub(crate) struct OutputSurface {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: SurfaceSize,
    pub format: wgpu::TextureFormat,
}

/// True when the cached surface must be (re)created for the wanted descriptor.
pub(crate) fn needs_provisioning(
    current: Option<(SurfaceSize, wgpu::TextureFormat)>,
    want_size: SurfaceSize,
    want_format: wgpu::TextureFormat,
) -> bool {
    match current {
        None => true,
        Some((size, format)) => size != want_size || format != want_format,
    }
}

/// Lazily provisioned output surfaces, one slot per channel. Owned by the
/// manager's render-side state and only ever touched on the render thread.
#[derive(Default)]
pub(crate) struct OutputSurfaces {
    velocity: Option<OutputSurface>,
    position: Option<OutputSurface>,
}

impl OutputSurfaces {
    fn slot_mut(&mut self, channel: FlockChannel) -> &mut Option<OutputSurface> {
        match channel {
            FlockChannel::Velocity => &mut self.velocity,
            FlockChannel::Position => &mut self.position,
        }
    }

    pub(crate) fn get(&self, channel: FlockChannel) -> Option<&OutputSurface> {
        match channel {
            FlockChannel::Velocity => self.velocity.as_ref(),
            FlockChannel::Position => self.position.as_ref(),
        }
    }

    /// Ensures a surface matching the input texture's format and the
    /// snapshot's extent exists for `channel`. Reuses the cached surface when
    /// the descriptor still matches; otherwise allocates a fresh one tagged
    /// with the channel's stable debug name. Failures leave any previously
    /// cached surface in place for future frames.
    pub(crate) fn provision(
        &mut self,
        device: &wgpu::Device,
        channel: FlockChannel,
        input: &wgpu::Texture,
        size: SurfaceSize,
        stats: &StatsCounters,
    ) -> Result<(), ProvisionError> {
        let format = input.format();
        if format != KERNEL_FORMAT {
            return Err(ProvisionError::FormatMismatch {
                actual: format,
                expected: KERNEL_FORMAT,
            });
        }

        let slot = self.slot_mut(channel);
        let current = slot.as_ref().map(|surface| (surface.size, surface.format));
        if !needs_provisioning(current, size, format) {
            return Ok(());
        }

        let limit = device.limits().max_texture_dimension_2d;
        if size.width > limit || size.height > limit {
            return Err(ProvisionError::ExtentTooLarge {
                width: size.width,
                height: size.height,
                limit,
            });
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(channel.debug_label()),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        tracing::debug!(
            channel = channel.name(),
            width = size.width,
            height = size.height,
            ?format,
            "provisioned output surface"
        );
        stats.surface_allocated();

        *slot = Some(OutputSurface {
            texture,
            view,
            size,
            format,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_surface_is_provisioned() {
        assert!(needs_provisioning(
            None,
            SurfaceSize::new(64, 64),
            KERNEL_FORMAT
        ));
    }

    #[test]
    fn matching_surface_is_reused() {
        let current = Some((SurfaceSize::new(64, 64), KERNEL_FORMAT));
        assert!(!needs_provisioning(
            current,
            SurfaceSize::new(64, 64),
            KERNEL_FORMAT
        ));
    }

    #[test]
    fn size_mismatch_invalidates_surface() {
        let current = Some((SurfaceSize::new(64, 64), KERNEL_FORMAT));
        assert!(needs_provisioning(
            current,
            SurfaceSize::new(128, 64),
            KERNEL_FORMAT
        ));
    }

    #[test]
    fn format_mismatch_invalidates_surface() {
        let current = Some((SurfaceSize::new(64, 64), wgpu::TextureFormat::Rgba8Unorm));
        assert!(needs_provisioning(
            current,
            SurfaceSize::new(64, 64),
            KERNEL_FORMAT
        ));
    }
}
