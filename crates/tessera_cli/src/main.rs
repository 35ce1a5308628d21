// Render an OBJ mesh with the debug gradient and save the result as PNG.
// Run with: cargo run --release --bin tessera -- <mesh.obj> [options]

use std::env;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use env_logger::Env;
use tessera_renderer::{
    BuildOptions, CancelFlag, FrameBuffer, GradientShader, RenderConfig, RenderOutcome, Scene,
    SchedulerOptions,
};

const USAGE: &str = "\
Usage: tessera <mesh.obj> [options]

Options:
  --scale S              Scale applied to mesh positions (default 1.0)
  --size WxH             Image resolution (default 512x512)
  --passes N             Number of passes to render (default 1)
  --threads N            Worker threads (default: all cores)
  --cancel-after-ms MS   Raise the cancel flag after MS milliseconds
  --output PATH          Output PNG (default render.png)";

#[derive(Debug, PartialEq)]
struct Args {
    mesh: PathBuf,
    scale: f32,
    width: u32,
    height: u32,
    passes: u32,
    threads: Option<usize>,
    cancel_after: Option<Duration>,
    output: PathBuf,
}

impl Args {
    /// Parse arguments, not including the program name.
    fn parse<I: Iterator<Item = String>>(mut args: I) -> Result<Option<Self>> {
        let mut mesh = None;
        let mut parsed = Args {
            mesh: PathBuf::new(),
            scale: 1.0,
            width: 512,
            height: 512,
            passes: 1,
            threads: None,
            cancel_after: None,
            output: PathBuf::from("render.png"),
        };

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| anyhow!("Missing value for {}", flag))
            };

            match arg.as_str() {
                "-h" | "--help" => return Ok(None),
                "--scale" => parsed.scale = parse_number(&value("--scale")?, "--scale")?,
                "--size" => {
                    let (width, height) = parse_size(&value("--size")?)?;
                    parsed.width = width;
                    parsed.height = height;
                }
                "--passes" => parsed.passes = parse_number(&value("--passes")?, "--passes")?,
                "--threads" => {
                    parsed.threads = Some(parse_number(&value("--threads")?, "--threads")?)
                }
                "--cancel-after-ms" => {
                    let ms = parse_number(&value("--cancel-after-ms")?, "--cancel-after-ms")?;
                    parsed.cancel_after = Some(Duration::from_millis(ms));
                }
                "--output" => parsed.output = PathBuf::from(value("--output")?),
                flag if flag.starts_with("--") => bail!("Unknown option {}", flag),
                path => {
                    if mesh.is_some() {
                        bail!("Unexpected argument {}", path);
                    }
                    mesh = Some(PathBuf::from(path));
                }
            }
        }

        parsed.mesh = mesh.ok_or_else(|| anyhow!("No mesh given"))?;
        if parsed.passes == 0 {
            bail!("--passes must be at least 1");
        }
        Ok(Some(parsed))
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("Invalid value '{}' for {}", value, flag))
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("Invalid size '{}', expected WxH", value))?;
    let width = parse_number(w, "--size")?;
    let height = parse_number(h, "--size")?;
    if width == 0 || height == 0 {
        bail!("Invalid size '{}', both dimensions must be non-zero", value);
    }
    Ok((width, height))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = match Args::parse(env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => {
            println!("{}", USAGE);
            return Ok(());
        }
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let mut scene = Scene::new(BuildOptions::default());
    if let Err(e) = scene.load_obj(&args.mesh, args.scale) {
        log::error!("{}", e);
        return Err(e).with_context(|| format!("Failed to load {}", args.mesh.display()));
    }

    let cancel = CancelFlag::new();
    if let Some(delay) = args.cancel_after {
        let flag = cancel.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            log::info!("Cancelling render after {} ms", delay.as_millis());
            flag.cancel();
        });
    }

    let options = SchedulerOptions::default().with_threads(args.threads.unwrap_or(0));
    let mut color = FrameBuffer::new(args.width, args.height);
    let mut aux = FrameBuffer::new(args.width, args.height);

    let start = Instant::now();
    let mut passes_done = 0;
    for pass in 0..args.passes {
        let config = RenderConfig::default()
            .with_resolution(args.width, args.height)
            .with_pass(pass, args.passes);

        match scene.render_with(&mut color, &mut aux, &config, &cancel, &options, &GradientShader)? {
            RenderOutcome::Completed { .. } => passes_done += 1,
            RenderOutcome::Cancelled {
                rows_completed,
                rows_total,
            } => {
                log::warn!(
                    "Pass {} cancelled with {}/{} rows done",
                    pass,
                    rows_completed,
                    rows_total
                );
                break;
            }
        }
    }

    log::info!(
        "Rendered {}/{} passes in {:.2} ms",
        passes_done,
        args.passes,
        start.elapsed().as_secs_f64() * 1000.0
    );

    save_png(&color, &args.output)?;
    log::info!("Saved {}", args.output.display());
    Ok(())
}

fn save_png(fb: &FrameBuffer, path: &Path) -> Result<()> {
    let image = image::RgbaImage::from_raw(fb.width(), fb.height(), fb.to_rgba8())
        .ok_or_else(|| anyhow!("Framebuffer does not match a {}x{} image", fb.width(), fb.height()))?;
    image
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}
