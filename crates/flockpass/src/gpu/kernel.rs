//! The fixed flocking kernel surface: embedded WGSL module, shared bind-group
//! layout, lazily built pipelines, and the dispatch-grid arithmetic.

use bytemuck::{Pod, Zeroable};

use crate::snapshot::FlockSnapshot;
use crate::types::{FlockChannel, SurfaceSize};

/// Resolution the kernel's group size was derived from.
pub const TARGET_RESOLUTION: u32 = 2048;
/// Tile count dividing the target resolution into thread groups.
pub const TILE_COUNT: u32 = 64;
/// Threads per group per axis. Must match `@workgroup_size` in the WGSL.
pub const GROUP_SIZE: u32 = TARGET_RESOLUTION / TILE_COUNT;
/// Texels each thread walks per axis. Must match the WGSL constant.
pub const PIXELS_PER_THREAD: u32 = 8;
/// Texels covered per group per axis.
pub const COVERAGE_PER_GROUP: u32 = GROUP_SIZE * PIXELS_PER_THREAD;
/// Fixed depth of the dispatch grid.
pub const DISPATCH_DEPTH: u32 = 1;

/// Stable identity of the kernel module.
pub const KERNEL_MODULE_PATH: &str = "flockpass/shaders/flock.wgsl";
pub const ENTRY_UPDATE_VELOCITY: &str = "update_velocity";
pub const ENTRY_UPDATE_POSITION: &str = "update_position";

/// The one storage format this shader permutation reads and writes. Client
/// textures in any other format are skipped with a warning.
pub const KERNEL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

const KERNEL_SOURCE: &str = include_str!("../shaders/flock.wgsl");

/// Thread groups needed to cover `size` without under-dispatching. Edge
/// over-dispatch is absorbed by the kernel's bounds checks.
pub fn dispatch_groups(size: SurfaceSize) -> (u32, u32, u32) {
    (
        size.width.div_ceil(COVERAGE_PER_GROUP),
        size.height.div_ceil(COVERAGE_PER_GROUP),
        DISPATCH_DEPTH,
    )
}

/// CPU mirror of the WGSL `FlockParams` uniform block.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct KernelUniforms {
    dims: [f32; 2],
    range: f32,
    align_scaler: f32,
    cohesion_scaler: f32,
    separation_scaler: f32,
    _pad: [f32; 2],
}

impl KernelUniforms {
    fn from_snapshot(snapshot: &FlockSnapshot) -> Self {
        let size = snapshot.cached_size();
        Self {
            dims: [size.width as f32, size.height as f32],
            range: snapshot.tuning.range,
            align_scaler: snapshot.tuning.align_scaler,
            cohesion_scaler: snapshot.tuning.cohesion_scaler,
            separation_scaler: snapshot.tuning.separation_scaler,
            _pad: [0.0; 2],
        }
    }
}

/// Compiled pipelines plus the params uniform buffer, created once on the
/// first dispatched frame and reused for the manager's lifetime.
pub(crate) struct KernelPipelines {
    bind_layout: wgpu::BindGroupLayout,
    velocity: wgpu::ComputePipeline,
    position: wgpu::ComputePipeline,
    params: wgpu::Buffer,
}

impl KernelPipelines {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(KERNEL_MODULE_PATH),
            source: wgpu::ShaderSource::Wgsl(KERNEL_SOURCE.into()),
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("flock kernel layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: KERNEL_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("flock kernel pipeline layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(entry),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };

        let velocity = make_pipeline(ENTRY_UPDATE_VELOCITY);
        let position = make_pipeline(ENTRY_UPDATE_POSITION);

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("flock kernel params"),
            size: std::mem::size_of::<KernelUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            bind_layout,
            velocity,
            position,
            params,
        }
    }

    pub(crate) fn pipeline(&self, channel: FlockChannel) -> &wgpu::ComputePipeline {
        match channel {
            FlockChannel::Velocity => &self.velocity,
            FlockChannel::Position => &self.position,
        }
    }

    /// Mirrors the snapshot's size vector and tuning scalars into the uniform
    /// buffer for this frame.
    pub(crate) fn write_params(&self, queue: &wgpu::Queue, snapshot: &FlockSnapshot) {
        let uniforms = KernelUniforms::from_snapshot(snapshot);
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&uniforms));
    }

    pub(crate) fn bind(
        &self,
        device: &wgpu::Device,
        velocity_in: &wgpu::TextureView,
        position_in: &wgpu::TextureView,
        output: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("flock kernel bind group"),
            layout: &self.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(velocity_in),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(position_in),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(output),
                },
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_coverage_matches_kernel_constants() {
        assert_eq!(GROUP_SIZE, 32);
        assert_eq!(COVERAGE_PER_GROUP, 256);
    }

    #[test]
    fn grid_exactly_covers_aligned_extent() {
        let (x, y, z) = dispatch_groups(SurfaceSize::new(2048, 2048));
        assert_eq!((x, y, z), (8, 8, 1));
        assert!(x * COVERAGE_PER_GROUP >= 2048);
        assert!((x - 1) * COVERAGE_PER_GROUP < 2048, "grid must be minimal");
    }

    #[test]
    fn grid_rounds_up_one_past_boundary() {
        let (x, y, _) = dispatch_groups(SurfaceSize::new(2049, 2048));
        assert_eq!(x, 9);
        assert_eq!(y, 8);
    }

    #[test]
    fn grid_never_under_dispatches() {
        for width in [1, 255, 256, 257, 511, 512, 1000, 4096] {
            let (x, _, _) = dispatch_groups(SurfaceSize::new(width, 1));
            assert!(x * COVERAGE_PER_GROUP >= width, "width {width}");
            assert!(
                x == 0 || (x - 1) * COVERAGE_PER_GROUP < width,
                "width {width} over-dispatched"
            );
        }
    }

    #[test]
    fn uniform_block_matches_wgsl_layout() {
        assert_eq!(std::mem::size_of::<KernelUniforms>(), 32);
        assert_eq!(std::mem::offset_of!(KernelUniforms, range), 8);
        assert_eq!(std::mem::offset_of!(KernelUniforms, separation_scaler), 20);
    }
}
