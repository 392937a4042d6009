use clap::{Parser, Subcommand};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::Level;

use mvprep::compose::{self, SessionConfig};
use mvprep::export::{save_mesh, ExportOptions};
use mvprep::mesh::{self, loader::with_suffix, CleanOptions, ColorFallback, ColoredMesh};

#[derive(Parser)]
#[command(name = "mvprep")]
#[command(about = "Image and mesh preprocessing for multi-view 3D reconstruction", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pad an image to a centered square canvas
    Square {
        input: PathBuf,

        #[arg(short, long)]
        out: PathBuf,

        /// Fill gray level for the padding (default: 255)
        #[arg(long, default_value_t = 255)]
        fill: u8,
    },

    /// Segment, crop and square a reference image
    Preprocess {
        input: PathBuf,

        #[arg(short, long)]
        out: PathBuf,

        /// Gray level of the transparent padding color (default: 255)
        #[arg(long, default_value_t = 255)]
        background: u8,

        /// Segmentation model (default: $MVPREP_REMBG_MODEL or ~/.u2net/u2net.onnx)
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Replace the background of RGBA views with a flat color
    ChangeBg {
        /// Input images (.png)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// New background as r,g,b in [0, 1] (default: 1,1,1)
        #[arg(long, value_parser = parse_color, default_value = "1,1,1")]
        color: [f32; 3],
    },

    /// Rotate normal maps of an orbit of views into a shared frame
    RotateNormals {
        /// Input normal maps in view order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        out: PathBuf,

        /// Rotate the opposite way (world to view)
        #[arg(long)]
        inverse: bool,
    },

    /// Recomposite normal maps over each view's canonical background normal
    NormalBg {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Extract a foreground mask from a normal map
    Mask {
        input: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Run the full mesh cleanup pipeline
    Clean {
        /// Input mesh file (.obj, .glb or .gltf)
        input: PathBuf,

        /// Output mesh file (.obj or .glb)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Mesh name (all meshes are merged when omitted)
        #[arg(short, long)]
        mesh: Option<String>,

        /// Cleanup options as JSON; missing fields keep their defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Convert colors from sRGB to linear on export
        #[arg(long)]
        linear: bool,
    },

    /// Close small holes
    CloseHoles {
        input: PathBuf,

        #[arg(short, long)]
        out: PathBuf,

        #[arg(short, long)]
        mesh: Option<String>,

        /// Largest hole to close, in boundary edges (default: 1000)
        #[arg(long, default_value_t = 1000)]
        max_hole_size: usize,

        /// Subdivide patch triangles
        #[arg(long)]
        refine: bool,

        /// Skip the duplicate/unreferenced cleanup pass
        #[arg(long)]
        no_baseline: bool,
    },

    /// Remove floating pieces smaller than a fraction of the mesh diagonal
    RemovePieces {
        input: PathBuf,

        #[arg(short, long)]
        out: PathBuf,

        #[arg(short, long)]
        mesh: Option<String>,

        /// Minimum component diagonal as a fraction of the mesh diagonal (default: 0.1)
        #[arg(short, long, default_value_t = 0.1)]
        fraction: f32,

        #[arg(long)]
        no_baseline: bool,
    },

    /// Exaggerate surface detail with an unsharp mask
    Sharpen {
        input: PathBuf,

        #[arg(short, long)]
        out: PathBuf,

        #[arg(short, long)]
        mesh: Option<String>,

        /// Detail weight (default: 0.4)
        #[arg(long, default_value_t = mesh::pipeline::SHARPEN_WEIGHT)]
        weight: f32,

        /// Weight of the original coordinates (default: 1.0)
        #[arg(long, default_value_t = mesh::pipeline::SHARPEN_WEIGHT_ORIG)]
        weight_orig: f32,

        /// Smoothing steps for the low-pass copy (default: 25)
        #[arg(short, long, default_value_t = mesh::pipeline::SHARPEN_ITERATIONS)]
        iterations: usize,

        #[arg(long)]
        no_baseline: bool,
    },

    /// Convert a mesh to .obj or .glb
    Export {
        input: PathBuf,

        #[arg(short, long)]
        out: PathBuf,

        #[arg(short, long)]
        mesh: Option<String>,

        #[arg(long)]
        linear: bool,

        /// Color an uncolored mesh by its normals instead of gray
        #[arg(long)]
        normal_colors: bool,
    },

    /// Display mesh statistics
    Stats {
        /// Input mesh file (.obj or .glb)
        input: PathBuf,

        #[arg(short, long)]
        mesh: Option<String>,
    },

    /// Check whether a mesh is manifold and watertight
    Check {
        input: PathBuf,

        #[arg(short, long)]
        mesh: Option<String>,
    },
}

fn parse_color(s: &str) -> Result<[f32; 3], String> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("invalid channel '{}': {}", p, e)))
        .collect::<Result<_, _>>()?;
    match parts[..] {
        [r, g, b] if [r, g, b].iter().all(|c| (0.0..=1.0).contains(c)) => Ok([r, g, b]),
        [_, _, _] => Err("channels must lie in [0, 1]".to_string()),
        _ => Err(format!("expected r,g,b, got '{}'", s)),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (action, result) = match cli.command {
        Commands::Square { input, out, fill } => ("padding image", square(&input, &out, fill)),
        Commands::Preprocess { input, out, background, model } => {
            ("preprocessing image", preprocess(&input, &out, background, model))
        }
        Commands::ChangeBg { inputs, out, color } => ("changing background", change_bg(&inputs, &out, color)),
        Commands::RotateNormals { inputs, out, inverse } => {
            ("rotating normals", rotate_normals(&inputs, &out, inverse))
        }
        Commands::NormalBg { inputs, out } => ("recompositing normals", normal_bg(&inputs, &out)),
        Commands::Mask { input, out } => ("extracting mask", mask(&input, &out)),
        Commands::Clean { input, out, mesh, config, linear } => {
            ("cleaning mesh", clean(&input, out, mesh.as_deref(), config.as_deref(), linear))
        }
        Commands::CloseHoles { input, out, mesh, max_hole_size, refine, no_baseline } => (
            "closing holes",
            run_filter(&input, &out, mesh.as_deref(), |m| {
                mesh::close_mesh_holes(m, max_hole_size, refine, !no_baseline)
            }),
        ),
        Commands::RemovePieces { input, out, mesh, fraction, no_baseline } => (
            "removing pieces",
            run_filter(&input, &out, mesh.as_deref(), |m| {
                mesh::remove_isolated_pieces(m, fraction, !no_baseline)
            }),
        ),
        Commands::Sharpen { input, out, mesh, weight, weight_orig, iterations, no_baseline } => (
            "sharpening mesh",
            run_filter(&input, &out, mesh.as_deref(), |m| {
                mesh::sharpen_mesh(m, weight, weight_orig, iterations, !no_baseline)
            }),
        ),
        Commands::Export { input, out, mesh, linear, normal_colors } => (
            "exporting mesh",
            export(&input, &out, mesh.as_deref(), linear, normal_colors),
        ),
        Commands::Stats { input, mesh } => ("reading mesh stats", show_stats(&input, mesh.as_deref())),
        Commands::Check { input, mesh } => ("checking mesh", check(&input, mesh.as_deref())),
    };

    if let Err(e) = result {
        eprintln!("Error {}: {}", action, e);
        std::process::exit(1);
    }
}

fn load_rgba(path: &Path) -> Result<RgbaImage, Box<dyn std::error::Error>> {
    Ok(image::open(path)?.to_rgba8())
}

fn load_views(inputs: &[PathBuf]) -> Result<Vec<RgbaImage>, Box<dyn std::error::Error>> {
    println!("Loading {} views...", inputs.len());
    inputs.iter().map(|p| load_rgba(p)).collect()
}

fn save_views(inputs: &[PathBuf], views: &[RgbaImage], out: &Path) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(out)?;
    for (input, view) in inputs.iter().zip(views) {
        let name = input.file_name().ok_or("Input path has no file name")?;
        let target = out.join(name).with_extension("png");
        view.save(&target)?;
        println!("Wrote {:?}", target);
    }
    Ok(())
}

fn square(input: &Path, out: &Path, fill: u8) -> Result<(), Box<dyn std::error::Error>> {
    let img = load_rgba(input)?;
    let squared = compose::expand_to_square(&img, Rgba([fill, fill, fill, 255]));
    println!(
        "{}x{} -> {}x{}",
        img.width(),
        img.height(),
        squared.width(),
        squared.height()
    );
    squared.save(out)?;
    Ok(())
}

fn preprocess(
    input: &Path,
    out: &Path,
    background: u8,
    model: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let img = image::open(input)?;
    if !img.color().has_alpha() {
        let mut config = SessionConfig::default();
        if let Some(model) = model {
            config.model_path = model;
        }
        println!("Loading segmentation model from {:?}...", config.model_path);
        compose::init_session(&config)?;
    }

    let result = compose::preprocess_image(img, background)?;
    println!("Preprocessed to {}x{}", result.width(), result.height());
    result.save(out)?;
    Ok(())
}

fn change_bg(inputs: &[PathBuf], out: &Path, color: [f32; 3]) -> Result<(), Box<dyn std::error::Error>> {
    let views = load_views(inputs)?;
    let changed = compose::change_backgrounds(&views, color);
    save_views(inputs, &changed, out)
}

fn rotate_normals(inputs: &[PathBuf], out: &Path, inverse: bool) -> Result<(), Box<dyn std::error::Error>> {
    let views = load_views(inputs)?;
    let direction = if inverse { -1.0 } else { 1.0 };
    let rotated = compose::rotate_views(&views, direction);
    save_views(inputs, &rotated, out)
}

fn normal_bg(inputs: &[PathBuf], out: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let views = load_views(inputs)?;
    let recomposed = compose::recompose_normal_background(&views);
    save_views(inputs, &recomposed, out)
}

fn mask(input: &Path, out: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let img = load_rgba(input)?;
    let mask = compose::normal_map_mask(&img);
    let covered = mask.pixels().filter(|p| p[0] > 0).count();
    println!(
        "Foreground: {} of {} pixels",
        covered,
        mask.width() as usize * mask.height() as usize
    );
    mask.save(out)?;
    Ok(())
}

fn load(input: &Path, mesh_name: Option<&str>) -> Result<ColoredMesh, Box<dyn std::error::Error>> {
    load_with(input, mesh_name, ColorFallback::Gray)
}

fn load_with(
    input: &Path,
    mesh_name: Option<&str>,
    fallback: ColorFallback,
) -> Result<ColoredMesh, Box<dyn std::error::Error>> {
    println!("Loading mesh from {:?}...", input);
    let mesh = mesh::load_mesh_with_fallback(input, mesh_name, fallback)?;
    println!("Loaded: {} vertices, {} faces", mesh.vertex_count(), mesh.face_count());
    Ok(mesh)
}

fn write(mesh: &ColoredMesh, out: &Path, linear: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Result: {} vertices, {} faces", mesh.vertex_count(), mesh.face_count());
    println!("Writing output to {:?}...", out);
    save_mesh(mesh, out, &ExportOptions { srgb_to_linear: linear })?;
    println!("Done!");
    Ok(())
}

fn clean(
    input: &Path,
    out: Option<PathBuf>,
    mesh_name: Option<&str>,
    config: Option<&Path>,
    linear: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let options: CleanOptions = match config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => CleanOptions::default(),
    };
    println!("Options: {}", serde_json::to_string(&options)?);

    let mesh = load(input, mesh_name)?;
    let cleaned = mesh::advanced_clean(mesh, &options)?;

    let out = out.unwrap_or_else(|| with_suffix(input, "_clean", "glb"));
    write(&cleaned, &out, linear)
}

fn run_filter<F>(input: &Path, out: &Path, mesh_name: Option<&str>, filter: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(ColoredMesh) -> mvprep::Result<ColoredMesh>,
{
    let mesh = load(input, mesh_name)?;
    let result = filter(mesh)?;
    write(&result, out, false)
}

fn export(
    input: &Path,
    out: &Path,
    mesh_name: Option<&str>,
    linear: bool,
    normal_colors: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let fallback = if normal_colors { ColorFallback::Normals } else { ColorFallback::Gray };
    let mesh = load_with(input, mesh_name, fallback)?;
    write(&mesh, out, linear)
}

fn show_stats(input: &Path, mesh_name: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let mesh = load(input, mesh_name)?;
    println!("\n{}", mesh::mesh_stats(&mesh));
    Ok(())
}

fn check(input: &Path, mesh_name: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let mesh = load(input, mesh_name)?;
    let report = mesh::check_manifold(&mesh);
    println!("\n{}", report);

    if !report.holes.is_empty() {
        println!("\nTo fix these holes, run:");
        println!("  mvprep close-holes {:?} --out <output.glb>", input);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharpen_defaults() {
        let cli = Cli::try_parse_from(["mvprep", "sharpen", "in.obj", "--out", "out.glb"]).unwrap();
        let Commands::Sharpen { weight, weight_orig, iterations, no_baseline, .. } = cli.command else {
            panic!("expected sharpen command");
        };
        assert_eq!(weight, 0.4);
        assert_eq!(weight_orig, 1.0);
        assert_eq!(iterations, 25);
        assert!(!no_baseline);
    }
}
