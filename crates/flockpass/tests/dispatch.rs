//! End-to-end dispatch tests against a real adapter.
//!
//! Every test degrades to a skip when no adapter is available or the adapter
//! cannot run the 32x32 kernel workgroups, so the suite stays green on
//! GPU-less CI runners.

use std::sync::mpsc;
use std::sync::Arc;

use flockpass::{
    CallbackRegistry, FlockChannel, FlockScheduler, FlockSnapshot, FlockTuning, KERNEL_FORMAT,
};

struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

fn gpu() -> Option<Gpu> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        force_fallback_adapter: false,
        compatible_surface: None,
    }))
    .ok()?;

    let limits = adapter.limits();
    if limits.max_compute_invocations_per_workgroup < 1024
        || limits.max_compute_workgroup_size_x < 32
        || limits.max_compute_workgroup_size_y < 32
    {
        eprintln!("adapter cannot run 32x32 workgroups; skipping");
        return None;
    }

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("flockpass tests"),
        required_limits: limits,
        ..Default::default()
    }))
    .ok()?;

    Some(Gpu { device, queue })
}

/// Client-side texture in the layout the kernel expects, seeded with one
/// uniform texel value.
fn client_texture(gpu: &Gpu, side: u32, texel: [f32; 4]) -> wgpu::Texture {
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("test client texture"),
        size: wgpu::Extent3d {
            width: side,
            height: side,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: KERNEL_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });

    let mut data = Vec::with_capacity((side * side) as usize * 4);
    for _ in 0..side * side {
        data.extend_from_slice(&texel);
    }
    gpu.queue.write_texture(
        texture.as_image_copy(),
        bytemuck::cast_slice(&data),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(side * 16),
            rows_per_image: Some(side),
        },
        wgpu::Extent3d {
            width: side,
            height: side,
            depth_or_array_layers: 1,
        },
    );
    texture
}

fn run_frame(gpu: &Gpu, registry: &CallbackRegistry) {
    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("test frame"),
        });
    registry.dispatch_frame(&gpu.device, &gpu.queue, &mut encoder);
    gpu.queue.submit(Some(encoder.finish()));
}

/// Reads the texel at (0, 0) back to the CPU.
fn read_texel(gpu: &Gpu, texture: &wgpu::Texture, side: u32) -> [f32; 4] {
    let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback"),
        size: (side * side * 16) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback"),
        });
    encoder.copy_texture_to_buffer(
        texture.as_image_copy(),
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(side * 16),
                rows_per_image: Some(side),
            },
        },
        wgpu::Extent3d {
            width: side,
            height: side,
            depth_or_array_layers: 1,
        },
    );
    gpu.queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).ok();
    });
    gpu.device.poll(wgpu::PollType::Wait).expect("device poll");
    rx.recv().expect("map callback").expect("buffer map");

    let mapped = slice.get_mapped_range();
    let texels: &[f32] = bytemuck::cast_slice(&mapped);
    [texels[0], texels[1], texels[2], texels[3]]
}

// Texel side chosen so one thread group covers the whole texture.
const SIDE: u32 = 64;

#[test]
fn frame_without_textures_is_skipped() {
    let Some(gpu) = gpu() else {
        eprintln!("no adapter; skipping");
        return;
    };

    let registry = Arc::new(CallbackRegistry::new());
    let mut scheduler = FlockScheduler::new(registry.clone());
    scheduler.begin(FlockSnapshot::new(None, None, FlockTuning::default()));

    run_frame(&gpu, &registry);

    let stats = scheduler.stats();
    assert_eq!(stats.frames_seen, 1);
    assert_eq!(stats.frames_skipped, 1);
    assert_eq!(stats.surfaces_allocated, 0);
    assert_eq!(stats.kernel_dispatches, 0);
    assert_eq!(stats.copy_backs, 0);
}

#[test]
fn dispatch_updates_both_client_textures() {
    let Some(gpu) = gpu() else {
        eprintln!("no adapter; skipping");
        return;
    };

    // Every boid at the origin with identical velocity: the steering terms
    // all cancel, so velocity stays (10, 0) and position integrates one
    // fixed time step.
    let velocity = client_texture(&gpu, SIDE, [10.0, 0.0, 0.0, 0.0]);
    let position = client_texture(&gpu, SIDE, [0.0, 0.0, 0.0, 0.0]);

    let registry = Arc::new(CallbackRegistry::new());
    let mut scheduler = FlockScheduler::new(registry.clone());
    scheduler.begin(FlockSnapshot::new(
        Some(velocity.clone()),
        Some(position.clone()),
        FlockTuning::default(),
    ));

    run_frame(&gpu, &registry);

    let stats = scheduler.stats();
    assert_eq!(stats.frames_seen, 1);
    assert_eq!(stats.frames_skipped, 0);
    assert_eq!(stats.surfaces_allocated, FlockChannel::ALL.len() as u64);
    assert_eq!(stats.kernel_dispatches, FlockChannel::ALL.len() as u64);
    assert_eq!(stats.copy_backs, FlockChannel::ALL.len() as u64);

    let vel = read_texel(&gpu, &velocity, SIDE);
    assert!((vel[0] - 10.0).abs() < 1e-4, "velocity.x = {}", vel[0]);
    assert!(vel[1].abs() < 1e-4, "velocity.y = {}", vel[1]);

    let pos = read_texel(&gpu, &position, SIDE);
    assert!((pos[0] - 10.0 * 0.0166667).abs() < 1e-3, "position.x = {}", pos[0]);
    assert!(pos[1].abs() < 1e-4, "position.y = {}", pos[1]);
}

#[test]
fn stable_extent_reuses_pooled_surfaces() {
    let Some(gpu) = gpu() else {
        eprintln!("no adapter; skipping");
        return;
    };

    let velocity = client_texture(&gpu, SIDE, [1.0, 1.0, 0.0, 0.0]);
    let position = client_texture(&gpu, SIDE, [4.0, 4.0, 0.0, 0.0]);

    let registry = Arc::new(CallbackRegistry::new());
    let mut scheduler = FlockScheduler::new(registry.clone());
    scheduler.begin(FlockSnapshot::new(
        Some(velocity),
        Some(position),
        FlockTuning::default(),
    ));

    for _ in 0..3 {
        run_frame(&gpu, &registry);
    }

    let stats = scheduler.stats();
    assert_eq!(stats.frames_seen, 3);
    assert_eq!(stats.surfaces_allocated, 2, "surfaces must be pooled");
    assert_eq!(stats.kernel_dispatches, 6);
}

#[test]
fn resize_reprovisions_surfaces() {
    let Some(gpu) = gpu() else {
        eprintln!("no adapter; skipping");
        return;
    };

    let registry = Arc::new(CallbackRegistry::new());
    let mut scheduler = FlockScheduler::new(registry.clone());
    scheduler.begin(FlockSnapshot::new(
        Some(client_texture(&gpu, SIDE, [1.0, 0.0, 0.0, 0.0])),
        Some(client_texture(&gpu, SIDE, [0.0, 0.0, 0.0, 0.0])),
        FlockTuning::default(),
    ));
    run_frame(&gpu, &registry);
    assert_eq!(scheduler.stats().surfaces_allocated, 2);

    scheduler.update_parameters(FlockSnapshot::new(
        Some(client_texture(&gpu, SIDE / 2, [1.0, 0.0, 0.0, 0.0])),
        Some(client_texture(&gpu, SIDE / 2, [0.0, 0.0, 0.0, 0.0])),
        FlockTuning::default(),
    ));
    run_frame(&gpu, &registry);

    let stats = scheduler.stats();
    assert_eq!(stats.surfaces_allocated, 4, "resize must reallocate");
    assert_eq!(stats.frames_skipped, 0);
}

#[test]
fn end_stops_per_frame_dispatch() {
    let Some(gpu) = gpu() else {
        eprintln!("no adapter; skipping");
        return;
    };

    let registry = Arc::new(CallbackRegistry::new());
    let mut scheduler = FlockScheduler::new(registry.clone());
    scheduler.begin(FlockSnapshot::new(
        Some(client_texture(&gpu, SIDE, [1.0, 0.0, 0.0, 0.0])),
        Some(client_texture(&gpu, SIDE, [0.0, 0.0, 0.0, 0.0])),
        FlockTuning::default(),
    ));
    run_frame(&gpu, &registry);
    scheduler.end();
    run_frame(&gpu, &registry);

    let stats = scheduler.stats();
    assert_eq!(stats.frames_seen, 1, "hook must be removed after end");
    assert_eq!(registry.hook_count(), 0);
}
