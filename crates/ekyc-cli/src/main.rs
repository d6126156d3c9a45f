use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ekyc_core::{EkycPipeline, Image, Landmark5, PipelineConfig, VerifyFailure};
use ekyc_onnx::OrtInference;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ekyc", about = "eKYC face verification CLI")]
struct Cli {
    /// Directory holding the ONNX model files
    #[arg(long, default_value = "models")]
    model_dir: PathBuf,

    /// TOML file overriding pipeline parameters
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate the face landmarks in one or more images
    Landmarks {
        images: Vec<PathBuf>,
    },
    /// Verify a far/mid/near challenge with optional precomputed landmarks
    VerifyActive {
        far: PathBuf,
        mid: PathBuf,
        near: PathBuf,
        /// JSON file with the far image's 5-point landmarks
        #[arg(long)]
        far_landmarks: Option<PathBuf>,
        #[arg(long)]
        mid_landmarks: Option<PathBuf>,
        #[arg(long)]
        near_landmarks: Option<PathBuf>,
    },
    /// Verify a far/mid/near challenge from raw images only
    VerifyPassive {
        far: PathBuf,
        mid: PathBuf,
        near: PathBuf,
    },
    /// Match the face on an identity document against a selfie
    MatchDocument {
        document: PathBuf,
        selfie: PathBuf,
        #[arg(long)]
        selfie_landmarks: Option<PathBuf>,
    },
    /// Score a far/mid/near triplet for face obstruction
    Quality {
        far: PathBuf,
        mid: PathBuf,
        near: PathBuf,
    },
    /// Print the identity embedding of a face image
    Embed {
        image: PathBuf,
    },
    /// Crop the face from a selfie into a document-photo frame
    CropSelfie {
        image: PathBuf,
        #[arg(short, long, default_value = "selfie.png")]
        output: PathBuf,
    },
    /// Crop the face from an identity document
    CropDocument {
        image: PathBuf,
        #[arg(short, long, default_value = "document-face.png")]
        output: PathBuf,
    },
}

fn load_image(path: &Path) -> Result<Image> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .to_rgb8();
    let (width, height) = decoded.dimensions();
    Image::from_raw(width, height, decoded.into_raw())
        .context("decoded image has an inconsistent buffer size")
}

fn load_landmarks(path: Option<&Path>) -> Result<Option<Landmark5>> {
    let Some(path) = path else { return Ok(None) };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read landmarks {}", path.display()))?;
    let landmarks: Landmark5 =
        serde_json::from_str(&raw).with_context(|| format!("bad landmarks in {}", path.display()))?;
    Ok(Some(landmarks))
}

fn save_image(crop: &Image, path: &Path) -> Result<()> {
    let buffer = image::RgbImage::from_raw(crop.width(), crop.height(), crop.data().to_vec())
        .context("crop has an inconsistent buffer size")?;
    buffer
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("bad config in {}", path.display()))
}

/// Print the partial result on verification failure and exit non-zero.
fn report_verification(
    outcome: std::result::Result<ekyc_core::VerificationResult, VerifyFailure>,
) -> Result<()> {
    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(failure) => {
            eprintln!("verification failed: {failure}");
            println!("{}", serde_json::to_string_pretty(&failure.partial)?);
            std::process::exit(1);
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let backend = Arc::new(OrtInference::load(&cli.model_dir)?);
    tracing::debug!(models = ?backend.model_names(), "backend ready");
    let pipeline = EkycPipeline::new(backend, config)?;

    match cli.command {
        Commands::Landmarks { images } => {
            let loaded: Vec<Image> = images
                .iter()
                .map(|p| load_image(p))
                .collect::<Result<_>>()?;
            let refs: Vec<&Image> = loaded.iter().collect();
            let faces = pipeline.locate_landmarks(&refs)?;
            println!("{}", serde_json::to_string_pretty(&faces)?);
        }
        Commands::VerifyActive {
            far,
            mid,
            near,
            far_landmarks,
            mid_landmarks,
            near_landmarks,
        } => {
            let outcome = pipeline.verify_active(
                &load_image(&far)?,
                &load_image(&mid)?,
                &load_image(&near)?,
                load_landmarks(far_landmarks.as_deref())?,
                load_landmarks(mid_landmarks.as_deref())?,
                load_landmarks(near_landmarks.as_deref())?,
            );
            report_verification(outcome)?;
        }
        Commands::VerifyPassive { far, mid, near } => {
            let outcome = pipeline.verify_passive(
                &load_image(&far)?,
                &load_image(&mid)?,
                &load_image(&near)?,
            );
            report_verification(outcome)?;
        }
        Commands::MatchDocument {
            document,
            selfie,
            selfie_landmarks,
        } => {
            let (score, is_match) = pipeline.match_document(
                &load_image(&document)?,
                &load_image(&selfie)?,
                load_landmarks(selfie_landmarks.as_deref())?,
            )?;
            println!(
                "{}",
                serde_json::json!({ "score": score, "is_match": is_match })
            );
        }
        Commands::Quality { far, mid, near } => {
            let (score, is_mask) = pipeline.check_quality(
                &load_image(&far)?,
                &load_image(&mid)?,
                &load_image(&near)?,
                None,
                None,
                None,
            )?;
            println!(
                "{}",
                serde_json::json!({ "score": score, "is_face_mask": is_mask })
            );
        }
        Commands::Embed { image } => {
            let embedding = pipeline.extract_embedding(&load_image(&image)?, None)?;
            println!("{}", serde_json::to_string(&embedding)?);
        }
        Commands::CropSelfie { image, output } => {
            let crop = pipeline.crop_selfie(&load_image(&image)?)?;
            save_image(&crop, &output)?;
            println!("wrote {}", output.display());
        }
        Commands::CropDocument { image, output } => {
            let crop = pipeline.crop_document_face(&load_image(&image)?)?;
            save_image(&crop, &output)?;
            println!("wrote {}", output.display());
        }
    }

    Ok(())
}
