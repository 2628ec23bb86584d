use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{decode_image, Config, FaceEncoder, FaceStore, MatchOutcome, OnnxFaceEncoder, Profile};
use facegate_hw::Camera;

mod capture;
mod investor;

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face enrollment and recognition CLI")]
struct Cli {
    /// Override the configured model directory
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Override the configured data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive camera loop: [E] enroll, [V] validate, [Q] quit
    Capture {
        /// V4L2 device (defaults to the configured camera)
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Enroll the single face in an image file
    Enroll {
        /// Identity key
        #[arg(long)]
        id: String,
        /// Image containing exactly one face
        #[arg(long)]
        image: PathBuf,
        /// Profile as a JSON object
        #[arg(long)]
        profile: Option<String>,
    },
    /// Match the face in an image file against enrolled faces
    Verify {
        #[arg(long)]
        image: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Show whether an identity is enrolled, with its profile
    Status { id: String },
    /// Remove an identity's embedding and profile
    Remove { id: String },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command {
        Commands::Capture { device } => {
            let device = device.unwrap_or_else(|| config.camera_device.clone());
            capture::run(&config, &device)?;
        }
        Commands::Enroll { id, image, profile } => {
            let profile = profile
                .as_deref()
                .map(Profile::parse)
                .transpose()
                .context("invalid --profile")?;
            let embedding = encode_file(&config, &image)?;
            let mut store = open_store(&config)?;
            store.register(&id, embedding, profile)?;
            println!("Enrolled {}", id.trim());
        }
        Commands::Verify { image } => {
            let embedding = encode_file(&config, &image)?;
            let store = open_store(&config)?;
            if store.is_empty() {
                println!("No faces enrolled");
                return Ok(());
            }
            match store.authenticate(&embedding, config.match_threshold) {
                MatchOutcome::Recognized {
                    identity,
                    distance,
                    confidence,
                } => {
                    println!("Recognized: {identity} (distance {distance:.4}, confidence {confidence:.4})");
                    if let Some(profile) = store.profile(&identity) {
                        println!("Profile: {}", profile.as_json());
                    }
                }
                MatchOutcome::Unrecognized { closest } => {
                    println!("Not recognized");
                    if let Some(candidate) = closest {
                        println!("Closest: {} (distance {:.4})", candidate.identity, candidate.distance);
                    }
                }
            }
        }
        Commands::List => {
            let store = open_store(&config)?;
            let ids = store.identities();
            if ids.is_empty() {
                println!("No faces enrolled");
            } else {
                for id in &ids {
                    let registered = store.face(id).map(|f| f.registered_at.as_str()).unwrap_or("-");
                    println!("{id:<24} {registered}");
                }
                println!("{} enrolled", ids.len());
            }
        }
        Commands::Status { id } => {
            let store = open_store(&config)?;
            let registered = store.is_registered(&id);
            println!("{}: {}", id.trim(), if registered { "registered" } else { "not registered" });
            if let Some(profile) = store.profile(&id).filter(|_| registered) {
                println!("Profile: {}", profile.as_json());
            }
        }
        Commands::Remove { id } => {
            let mut store = open_store(&config)?;
            if store.remove(&id)?.any() {
                println!("Removed {}", id.trim());
            } else {
                println!("{} was not enrolled", id.trim());
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{:<14} {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<FaceStore> {
    FaceStore::open(&config.data_dir)
        .with_context(|| format!("opening face store in {}", config.data_dir.display()))
}

fn encode_file(config: &Config, path: &std::path::Path) -> Result<facegate_core::Embedding> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let image = decode_image(&bytes)?;
    let mut encoder = OnnxFaceEncoder::load(&config.model_dir).context("loading face models")?;
    encoder
        .encode(&image)
        .with_context(|| format!("encoding {}", path.display()))
}
