//! Plain data shared across the snapshot, cache, and dispatch layers.

/// Two-dimensional texture extent in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub const ZERO: Self = Self {
        width: 0,
        height: 0,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Reads the live extent of a texture handle.
    pub fn of_texture(texture: &wgpu::Texture) -> Self {
        Self {
            width: texture.width(),
            height: texture.height(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The four flocking knobs forwarded verbatim to the kernel.
///
/// No range validation is performed; any float the caller supplies reaches
/// the shader unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlockTuning {
    pub range: f32,
    pub align_scaler: f32,
    pub cohesion_scaler: f32,
    pub separation_scaler: f32,
}

impl Default for FlockTuning {
    fn default() -> Self {
        Self {
            range: 1.0,
            align_scaler: 1.0,
            cohesion_scaler: 1.0,
            separation_scaler: 1.0,
        }
    }
}

/// Logical output channels computed each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlockChannel {
    Velocity,
    Position,
}

impl FlockChannel {
    pub const ALL: [FlockChannel; 2] = [FlockChannel::Velocity, FlockChannel::Position];

    /// Stable debug name attached to the pooled output surface.
    pub fn debug_label(self) -> &'static str {
        match self {
            FlockChannel::Velocity => "flock velocity output",
            FlockChannel::Position => "flock position output",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FlockChannel::Velocity => "velocity",
            FlockChannel::Position => "position",
        }
    }
}
