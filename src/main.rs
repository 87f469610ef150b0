use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facetrack::config::{self, Config};
use facetrack::response::{AuthResponse, EnrollResponse};
use facetrack::{Engine, Image, IdentityStore};
use facetrack_vision::{Camera, LandmarkAligner, SFaceEncoder, YuNetDetector};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "facetrack")]
#[command(
    version,
    about = "Face tracking, enrollment and authentication over a process-lifetime identity catalog"
)]
struct Cli {
    /// Config file (defaults to the installed config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// `NAME=PATH` pair used to seed the catalog before a command runs.
#[derive(Clone, Debug)]
struct GalleryEntry {
    name: String,
    path: PathBuf,
}

fn parse_gallery_entry(raw: &str) -> Result<GalleryEntry, String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok(GalleryEntry {
            name: name.to_string(),
            path: PathBuf::from(path),
        }),
        _ => Err(format!("expected NAME=PATH, got {:?}", raw)),
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the most prominent face of an image
    Enroll {
        /// Display name of the new identity
        #[arg(short, long)]
        name: String,
        image: PathBuf,
        /// Faces to enroll first, as NAME=PATH
        #[arg(short, long, value_parser = parse_gallery_entry)]
        gallery: Vec<GalleryEntry>,
    },
    /// Authenticate the most prominent face of an image against the gallery
    Auth {
        image: PathBuf,
        #[arg(short, long, value_parser = parse_gallery_entry)]
        gallery: Vec<GalleryEntry>,
    },
    /// Continuously recognize faces from image files or the camera
    Watch {
        /// Frames to process in order; the camera is used when none are given
        frames: Vec<PathBuf>,
        #[arg(short, long, value_parser = parse_gallery_entry)]
        gallery: Vec<GalleryEntry>,
        /// Session id the frames belong to
        #[arg(short, long, default_value = "cli")]
        session: String,
        /// Stop after this many camera frames
        #[arg(short, long)]
        max_frames: Option<usize>,
    },
    /// Print the effective config, or write it to the config path
    Config {
        #[arg(short, long)]
        write: bool,
    },
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll {
            name,
            image,
            gallery,
        } => {
            let engine = build_engine(&cfg, &gallery)?;
            let image = Image::open(&image)?;
            print_json(&EnrollResponse::from(engine.enroll(&image, &name)))
        }
        Commands::Auth { image, gallery } => {
            let engine = build_engine(&cfg, &gallery)?;
            let image = Image::open(&image)?;
            print_json(&AuthResponse::from(engine.authenticate(&image)))
        }
        Commands::Watch {
            frames,
            gallery,
            session,
            max_frames,
        } => {
            let engine = build_engine(&cfg, &gallery)?;
            if frames.is_empty() {
                watch_camera(&engine, &cfg, &session, max_frames)
            } else {
                for path in &frames {
                    let image = Image::open(path)?;
                    recognize(&engine, &session, &image)?;
                }
                Ok(())
            }
        }
        Commands::Config { write } => {
            if write {
                config::save_config(&cfg, cli.config.as_deref())?;
                info!("config written");
                Ok(())
            } else {
                print!("{}", toml::to_string_pretty(&cfg)?);
                Ok(())
            }
        }
    }
}

fn build_engine(cfg: &Config, gallery: &[GalleryEntry]) -> Result<Engine> {
    let models = &cfg.models;
    let detector = YuNetDetector::from_file(
        &models.detector,
        models.score_threshold,
        models.nms_threshold,
    )
    .context("Failed to load face detector")?;
    let encoder = SFaceEncoder::from_file(&models.encoder).context("Failed to load face encoder")?;

    let engine = Engine::new(
        Arc::new(IdentityStore::new()),
        Box::new(detector),
        Box::new(LandmarkAligner::new(models.crop_size)),
        Box::new(encoder),
        cfg,
    );

    for entry in gallery {
        let image = Image::open(&entry.path)?;
        match engine.enroll(&image, &entry.name) {
            Ok(identity) => info!("gallery: {} -> {}", entry.name, identity.id),
            Err(e) => warn!("gallery: skipping {} ({}): {}", entry.name, entry.path.display(), e),
        }
    }
    info!("catalog holds {} identit(ies)", engine.identity_count());
    Ok(engine)
}

fn recognize(engine: &Engine, session: &str, image: &Image) -> Result<()> {
    let faces = engine.process_frame(session, image)?;
    print_json(&faces)
}

fn watch_camera(engine: &Engine, cfg: &Config, session: &str, max_frames: Option<usize>) -> Result<()> {
    info!("Opening camera: {}", cfg.camera);
    let mut camera = Camera::open(&cfg.camera).context("Failed to open camera")?;

    let mut processed = 0;
    while max_frames.map_or(true, |max| processed < max) {
        match camera.frame() {
            Ok(image) => recognize(engine, session, &image)?,
            Err(e) => warn!("Frame {}: {}", processed + 1, e),
        }
        processed += 1;
    }
    engine.close_session(session);
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
