//! Headless frame loop: builds a device, seeds the boid textures, drives the
//! scheduler for the requested number of frames, and prints a summary from a
//! final readback.

use anyhow::{anyhow, Context, Result};
use flockpass::{
    CallbackRegistry, FlockScheduler, FlockSnapshot, FlockTuning, KERNEL_FORMAT,
};
use std::sync::{mpsc, Arc};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

pub fn initialise_tracing() {
    let default_filter = "warn,flockrun=info,flockpass=info,naga=error,wgpu=error,wgpu_core=error,wgpu_hal=error";
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(cli: Cli) -> Result<()> {
    if cli.size == 0 {
        return Err(anyhow!("--size must be at least 1"));
    }

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: if cli.low_power {
            wgpu::PowerPreference::LowPower
        } else {
            wgpu::PowerPreference::HighPerformance
        },
        force_fallback_adapter: false,
        compatible_surface: None,
    }))
    .context("no compatible GPU adapter")?;

    let info = adapter.get_info();
    tracing::info!(name = %info.name, backend = ?info.backend, "selected adapter");

    let limits = adapter.limits();
    if limits.max_compute_invocations_per_workgroup < 1024 {
        return Err(anyhow!(
            "adapter supports only {} compute invocations per workgroup; 1024 required",
            limits.max_compute_invocations_per_workgroup
        ));
    }

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("flockrun"),
        required_limits: limits,
        ..Default::default()
    }))
    .context("requesting device")?;

    let velocity = seeded_texture(&device, &queue, cli.size, "boid velocities", |x, y| {
        // Deterministic pseudo-random unit-ish velocities.
        let h = hash2(x, y);
        let angle = (h as f32 / u32::MAX as f32) * std::f32::consts::TAU;
        [angle.cos() * 4.0, angle.sin() * 4.0, 0.0, 0.0]
    });
    let position = seeded_texture(&device, &queue, cli.size, "boid positions", |x, y| {
        [x as f32 + 0.5, y as f32 + 0.5, 0.0, 0.0]
    });

    let mut tuning = FlockTuning {
        range: cli.range,
        align_scaler: cli.align,
        cohesion_scaler: cli.cohesion,
        separation_scaler: cli.separation,
    };

    let registry = Arc::new(CallbackRegistry::new());
    let mut scheduler = FlockScheduler::new(registry.clone());
    scheduler.begin(FlockSnapshot::new(
        Some(velocity.clone()),
        Some(position.clone()),
        tuning,
    ));

    for frame in 0..cli.frames {
        if cli.range_growth != 0.0 {
            tuning.range += cli.range_growth;
            scheduler.update_parameters(FlockSnapshot::new(
                Some(velocity.clone()),
                Some(position.clone()),
                tuning,
            ));
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("flockrun frame"),
        });
        registry.dispatch_frame(&device, &queue, &mut encoder);
        queue.submit(Some(encoder.finish()));
        tracing::debug!(frame, range = tuning.range, "frame submitted");
    }

    let velocities = read_texels(&device, &queue, &velocity, cli.size)?;
    let positions = read_texels(&device, &queue, &position, cli.size)?;
    scheduler.end();

    let boids = (cli.size * cli.size) as f32;
    let mean_speed = velocities
        .iter()
        .map(|v| (v[0] * v[0] + v[1] * v[1]).sqrt())
        .sum::<f32>()
        / boids;
    let (cx, cy) = positions
        .iter()
        .fold((0.0f32, 0.0f32), |(x, y), p| (x + p[0], y + p[1]));

    let stats = scheduler.stats();
    println!("flockrun: {} boids, {} frames", boids as u64, cli.frames);
    println!("  mean speed:      {mean_speed:.4}");
    println!("  flock centroid:  ({:.2}, {:.2})", cx / boids, cy / boids);
    println!(
        "  frames seen/skipped: {}/{}",
        stats.frames_seen, stats.frames_skipped
    );
    println!(
        "  dispatches: {}  copy-backs: {}  surfaces allocated: {}",
        stats.kernel_dispatches, stats.copy_backs, stats.surfaces_allocated
    );
    Ok(())
}

fn hash2(x: u32, y: u32) -> u32 {
    let mut h = x.wrapping_mul(0x9e37_79b9) ^ y.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb_352d);
    h ^= h >> 15;
    h
}

fn seeded_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    side: u32,
    label: &str,
    texel: impl Fn(u32, u32) -> [f32; 4],
) -> wgpu::Texture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
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
    for y in 0..side {
        for x in 0..side {
            data.extend_from_slice(&texel(x, y));
        }
    }
    queue.write_texture(
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

fn read_texels(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    side: u32,
) -> Result<Vec<[f32; 4]>> {
    // Copy rows padded out to the 256-byte alignment wgpu requires.
    let unpadded = (side * 16) as usize;
    let padded = unpadded.div_ceil(256) * 256;

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("flockrun readback"),
        size: (padded * side as usize) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("flockrun readback"),
    });
    encoder.copy_texture_to_buffer(
        texture.as_image_copy(),
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded as u32),
                rows_per_image: Some(side),
            },
        },
        wgpu::Extent3d {
            width: side,
            height: side,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).ok();
    });
    device
        .poll(wgpu::PollType::Wait)
        .context("polling for readback")?;
    rx.recv()
        .context("map callback dropped")?
        .context("mapping readback buffer")?;

    let mapped = slice.get_mapped_range();
    let mut texels = Vec::with_capacity((side * side) as usize);
    for row in mapped.chunks_exact(padded) {
        let floats: &[f32] = bytemuck::cast_slice(&row[..unpadded]);
        for texel in floats.chunks_exact(4) {
            texels.push([texel[0], texel[1], texel[2], texel[3]]);
        }
    }
    Ok(texels)
}
