use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "flockrun",
    author,
    version,
    about = "Headless driver for the flockpass compute kernels"
)]
pub struct Cli {
    /// Side length of the square velocity/position textures, in texels.
    #[arg(long, value_name = "TEXELS", default_value_t = 256)]
    pub size: u32,

    /// Number of frames to simulate before printing the summary.
    #[arg(long, value_name = "COUNT", default_value_t = 120)]
    pub frames: u32,

    /// Neighbor radius, in position units.
    #[arg(long, value_name = "UNITS", default_value_t = 1.0)]
    pub range: f32,

    /// Alignment steering weight.
    #[arg(long, value_name = "SCALE", default_value_t = 1.0)]
    pub align: f32,

    /// Cohesion steering weight.
    #[arg(long, value_name = "SCALE", default_value_t = 1.0)]
    pub cohesion: f32,

    /// Separation steering weight.
    #[arg(long, value_name = "SCALE", default_value_t = 1.0)]
    pub separation: f32,

    /// Grow the neighbor radius by this much every frame, mimicking a host
    /// that republishes parameters per tick.
    #[arg(long, value_name = "UNITS", default_value_t = 0.0)]
    pub range_growth: f32,

    /// Prefer a low-power adapter over a discrete one.
    #[arg(long)]
    pub low_power: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}
