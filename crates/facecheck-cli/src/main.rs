mod config;
mod engine;
mod response;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecheck_core::Image;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "facecheck", about = "Face detection, embedding, and verification")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the largest face in an image
    Detect {
        /// Image file to scan
        image: PathBuf,
    },
    /// Extract the normalized embedding of the largest face
    Embed {
        /// Image file to embed
        image: PathBuf,
    },
    /// Check whether two images show the same person
    Verify {
        image1: PathBuf,
        image2: PathBuf,
    },
    /// Report model configuration and whether the models load
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::Config::from_env();
    tracing::debug!(model_dir = %config.model_dir.display(), "configuration loaded");

    let response = run(cli.command, &config)
        .await
        .unwrap_or_else(|e| response::failure(format!("{e:#}")));

    if response.kind == response::ResponseKind::Failed {
        tracing::error!(response = %response.body, "request failed");
    }
    println!("{}", serde_json::to_string_pretty(&response.body)?);
    Ok(response.exit_code())
}

/// Decode the inputs, run the request on the engine and shape the reply.
async fn run(command: Commands, config: &config::Config) -> Result<response::Response> {
    let response = match command {
        Commands::Detect { image } => {
            let image = load_image(&image)?;
            match start_engine(config)?.detect(image).await {
                Ok(outcome) => response::detect(&outcome),
                Err(e) => response::error(&e),
            }
        }
        Commands::Embed { image } => {
            let image = load_image(&image)?;
            match start_engine(config)?.embed(image).await {
                Ok(outcome) => response::embed(&outcome),
                Err(e) => response::error(&e),
            }
        }
        Commands::Verify { image1, image2 } => {
            let first = load_image(&image1)?;
            let second = load_image(&image2)?;
            match start_engine(config)?.verify(first, second).await {
                Ok(outcome) => response::verify(&outcome),
                Err(e) => response::error(&e),
            }
        }
        Commands::Status => {
            let models_loaded = match engine::load_pipeline(config) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "models unavailable");
                    false
                }
            };
            response::Response::ok(response::status(models_loaded))
        }
    };
    Ok(response)
}

fn start_engine(config: &config::Config) -> Result<engine::EngineHandle> {
    let pipeline = engine::load_pipeline(config).context("failed to load models")?;
    Ok(engine::spawn_engine(pipeline)?)
}

/// Decode an image file into an RGB buffer.
fn load_image(path: &Path) -> Result<Image> {
    let decoded =
        image::open(path).with_context(|| format!("could not decode {}", path.display()))?;
    let image = Image::from_rgb(decoded.to_rgb8());
    tracing::debug!(
        path = %path.display(),
        width = image.width,
        height = image.height,
        "image decoded"
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_models() -> config::Config {
        config::Config::from_lookup(|key| match key {
            "FACECHECK_MODEL_DIR" => Some("/nonexistent/facecheck-models".to_string()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_undecodable_image_is_reported_as_json() {
        let path = std::env::temp_dir().join("facecheck-not-an-image.png");
        std::fs::write(&path, b"plain text, not a png").unwrap();

        let err = run(Commands::Detect { image: path.clone() }, &no_models())
            .await
            .err()
            .expect("decoding must fail");
        let resp = response::failure(format!("{err:#}"));
        std::fs::remove_file(&path).ok();

        assert_eq!(resp.kind, response::ResponseKind::Failed);
        let message = resp.body["error"].as_str().unwrap();
        assert!(message.contains("could not decode"), "{message}");
        assert_eq!(resp.body.as_object().map(|o| o.len()), Some(1));
    }

    #[tokio::test]
    async fn test_missing_image_file_fails_before_model_load() {
        let err = run(
            Commands::Verify {
                image1: PathBuf::from("/nonexistent/a.jpg"),
                image2: PathBuf::from("/nonexistent/b.jpg"),
            },
            &no_models(),
        )
        .await
        .err()
        .expect("missing files must fail");
        let resp = response::failure(format!("{err:#}"));
        assert_eq!(resp.kind, response::ResponseKind::Failed);
        assert!(resp.body["error"].as_str().unwrap().contains("/nonexistent/a.jpg"));
    }

    #[tokio::test]
    async fn test_status_without_models() {
        let resp = run(Commands::Status, &no_models()).await.unwrap();
        assert_eq!(resp.kind, response::ResponseKind::Ok);
        assert_eq!(resp.body["models_loaded"], serde_json::json!(false));
    }
}
