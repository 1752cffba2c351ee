use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::DVec3;
use tracing_subscriber::EnvFilter;
use sunrise_common::{GeoPoint, Timestamp};
use sunrise_kernel::{DebugEngine, RendererContext};
use sunrise_render::{RenderRequest, RenderSession, SessionConfig, TileAddress, TileRenderer};

#[derive(Parser)]
#[command(name = "sunrise-cli", about = "CLI tool for sunrise scene rendering")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Print the padded camera window of every tile in a grid
    Tiles {
        #[arg(long, default_value = "2")]
        rows: u32,
        #[arg(long, default_value = "2")]
        cols: u32,
        /// Tile width in pixels
        #[arg(long, default_value = "512")]
        width: u32,
        /// Tile height in pixels
        #[arg(long, default_value = "512")]
        height: u32,
        /// Ghost margin in pixels
        #[arg(long, default_value = "16")]
        ghost: u32,
    },
    /// Render a scene tile by tile with the debug engine and stitch it into a PNG
    Render {
        /// Session config (.yaml, .yml or .json); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output PNG path
        #[arg(short, long, default_value = "sunrise.png")]
        out: PathBuf,
        #[arg(long, default_value = "1")]
        rows: u32,
        #[arg(long, default_value = "1")]
        cols: u32,
        /// Tile width in pixels
        #[arg(long, default_value = "256")]
        width: u32,
        /// Tile height in pixels
        #[arg(long, default_value = "256")]
        height: u32,
        /// Hours after 2023-06-01T00:00Z
        #[arg(long, default_value = "12")]
        hour: u32,
        /// Camera position
        #[arg(long, num_args = 3, default_values_t = [0.0, 0.0, 2.0], allow_negative_numbers = true)]
        position: Vec<f64>,
        /// Camera viewing direction
        #[arg(long, num_args = 3, default_values_t = [0.0, 0.0, -1.0], allow_negative_numbers = true)]
        direction: Vec<f64>,
        /// Camera up vector
        #[arg(long, num_args = 3, default_values_t = [0.0, 1.0, 0.0], allow_negative_numbers = true)]
        up: Vec<f64>,
    },
}

/// Coarse sub-solar point: declination from the day of year, longitude from UTC time.
/// Stands in for a real ephemeris, which the CLI does not ship.
fn approximate_subpoint(time: Timestamp) -> GeoPoint {
    let day = time.unix_seconds().div_euclid(86_400) as f64;
    let day_of_year = (day + 0.5 - 10_957.0).rem_euclid(365.25);
    let declination = -23.44 * (std::f64::consts::TAU * (day_of_year + 10.0) / 365.25).cos();
    GeoPoint::new(declination, (12.0 - time.utc_hour()) * 15.0)
}

fn vec3(v: &[f64]) -> DVec3 {
    DVec3::new(v[0], v[1], v[2])
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("sunrise-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", sunrise_common::crate_info());
            println!("kernel: {}", sunrise_kernel::crate_info());
            println!("assets: {}", sunrise_assets::crate_info());
            println!("scene: {}", sunrise_scene::crate_info());
            println!("render: {}", sunrise_render::crate_info());
        }
        Commands::Tiles {
            rows,
            cols,
            width,
            height,
            ghost,
        } => {
            let renderer = TileRenderer::new(ghost);
            println!("{rows}x{cols} tiles of {width}x{height}, ghost {ghost}");
            for tile in TileAddress::grid(rows, cols) {
                let plan = renderer.plan(tile, width, height)?;
                println!(
                    "  row {} col {}: window x[{:.6}, {:.6}) y[{:.6}, {:.6})  padded x[{:.6}, {:.6}) y[{:.6}, {:.6})  frame {}x{}",
                    tile.row,
                    tile.col,
                    plan.window.start.x,
                    plan.window.end.x,
                    plan.window.start.y,
                    plan.window.end.y,
                    plan.padded.start.x,
                    plan.padded.end.x,
                    plan.padded.start.y,
                    plan.padded.end.y,
                    plan.frame_width(),
                    plan.frame_height()
                );
            }
        }
        Commands::Render {
            config,
            out,
            rows,
            cols,
            width,
            height,
            hour,
            position,
            direction,
            up,
        } => {
            let config = match &config {
                Some(path) => SessionConfig::load(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => SessionConfig::default(),
            };
            let engine = Arc::new(DebugEngine::new());
            let ctx = RendererContext::new(engine.clone());
            let session = RenderSession::build(&ctx, &config, Arc::new(approximate_subpoint))
                .context("building session")?;

            let (full_width, full_height) = width
                .checked_mul(cols)
                .zip(height.checked_mul(rows))
                .context("stitched image size overflows")?;
            let mut image = image::RgbaImage::new(full_width, full_height);
            let time = Timestamp::from_reference_hour(hour);
            for tile in TileAddress::grid(rows, cols) {
                let request = RenderRequest {
                    width,
                    height,
                    tile,
                    position: vec3(&position),
                    direction: vec3(&direction),
                    up: vec3(&up),
                    time,
                };
                let response = session
                    .render(&request)
                    .with_context(|| format!("rendering tile {} {}", tile.row, tile.col))?;
                let part = image::RgbaImage::from_raw(response.width, response.height, response.pixels)
                    .context("tile pixel buffer has the wrong size")?;
                image::imageops::replace(
                    &mut image,
                    &part,
                    i64::from(tile.col.index * width),
                    i64::from(tile.row.index * height),
                );
            }
            if let Some(frame) = session.last_frame() {
                println!(
                    "sun at lat {:.2} lng {:.2}, {} instances, {} lights",
                    frame.sun.subpoint.lat, frame.sun.subpoint.lng, frame.instances, frame.lights
                );
            }
            session.close();

            image
                .save(&out)
                .with_context(|| format!("writing {}", out.display()))?;
            let stats = engine.stats();
            println!(
                "wrote {} ({full_width}x{full_height}), {} renders, {} engine objects released",
                out.display(),
                stats.renders,
                stats.released
            );
        }
    }

    Ok(())
}
