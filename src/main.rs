use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use dotenvy::dotenv;
use tracing::{info, warn};

mod config;
mod llm;
mod report;
mod server;
mod state;
mod utils;

use config::CONFIG;
use llm::media::{detect_mime_type, is_image_mime, DataUri};
use llm::{DescribeImageInput, GeminiDescriber, GeminiSettings, ImageDescriber};
use report::{ControllerSettings, SimulatedDelivery};
use state::AppState;
use utils::logging::init_logging;

#[derive(Debug, PartialEq)]
struct DescribeArgs {
    file_path: PathBuf,
    mime_type: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Command {
    Serve,
    Describe(DescribeArgs),
}

fn usage() -> &'static str {
    "Usage: citylens [serve]\n       citylens describe --file <path> [--mime <type>]"
}

fn parse_describe_args(args: &[String]) -> anyhow::Result<DescribeArgs> {
    let mut file_path: Option<PathBuf> = None;
    let mut mime_type: Option<String> = None;

    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--file" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --file"))?;
                file_path = Some(PathBuf::from(value));
            }
            "--mime" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --mime"))?;
                mime_type = Some(value.to_ascii_lowercase());
            }
            "--help" | "-h" => {
                return Err(anyhow!(usage()));
            }
            other => {
                return Err(anyhow!("Unknown describe argument: {other}\n{}", usage()));
            }
        }
        index += 1;
    }

    let file_path = file_path.ok_or_else(|| anyhow!("--file is required"))?;
    Ok(DescribeArgs {
        file_path,
        mime_type,
    })
}

fn parse_command(args: &[String]) -> anyhow::Result<Command> {
    match args.get(1).map(|value| value.as_str()) {
        None | Some("serve") => Ok(Command::Serve),
        Some("describe") => Ok(Command::Describe(parse_describe_args(args)?)),
        Some("--help") | Some("-h") => Err(anyhow!(usage())),
        Some(other) => Err(anyhow!("Unknown command: {other}\n{}", usage())),
    }
}

fn gemini_describer() -> GeminiDescriber {
    if CONFIG.gemini_api_key_missing() {
        warn!("GEMINI_API_KEY is not set; image analysis requests will fail");
    }
    GeminiDescriber::new(GeminiSettings::from_config(&CONFIG))
}

async fn run_describe(args: DescribeArgs) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&args.file_path)
        .await
        .map_err(|err| anyhow!("Could not read {}: {err}", args.file_path.display()))?;
    let mime_type = args
        .mime_type
        .or_else(|| detect_mime_type(&bytes))
        .ok_or_else(|| anyhow!("Could not detect the image type; pass --mime"))?;
    if !is_image_mime(&mime_type) {
        return Err(anyhow!("{} is not an image ({mime_type})", args.file_path.display()));
    }

    let describer = gemini_describer();
    info!(
        "Describing {} ({}, {} bytes) with {}",
        args.file_path.display(),
        mime_type,
        bytes.len(),
        describer.model_label()
    );
    let input = DescribeImageInput {
        photo_data_uri: DataUri::encode(&mime_type, &bytes),
    };
    let description = describer.describe(&input).await?;
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}

async fn run_server() -> anyhow::Result<()> {
    let state = AppState::new(
        Arc::new(gemini_describer()),
        Arc::new(SimulatedDelivery::new(CONFIG.submission_delay())),
        ControllerSettings {
            location_timeout: CONFIG.location_timeout(),
        },
        CONFIG.session_idle_timeout(),
    );

    info!("Starting CityLens");
    server::serve(state, CONFIG.bind_addr, CONFIG.max_upload_bytes).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _guards = init_logging();

    let args: Vec<String> = std::env::args().collect();
    match parse_command(&args)? {
        Command::Describe(describe_args) => run_describe(describe_args).await,
        Command::Serve => run_server().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn defaults_to_serve() {
        assert_eq!(parse_command(&args(&["citylens"])).unwrap(), Command::Serve);
        assert_eq!(
            parse_command(&args(&["citylens", "serve"])).unwrap(),
            Command::Serve
        );
    }

    #[test]
    fn parses_describe_arguments() {
        let command = parse_command(&args(&[
            "citylens",
            "describe",
            "--file",
            "pothole.jpg",
            "--mime",
            "IMAGE/JPEG",
        ]))
        .unwrap();
        assert_eq!(
            command,
            Command::Describe(DescribeArgs {
                file_path: PathBuf::from("pothole.jpg"),
                mime_type: Some("image/jpeg".to_string()),
            })
        );
    }

    #[test]
    fn describe_requires_a_file() {
        let err = parse_command(&args(&["citylens", "describe"])).unwrap_err();
        assert!(err.to_string().contains("--file is required"));

        let err = parse_command(&args(&["citylens", "describe", "--bogus"])).unwrap_err();
        assert!(err.to_string().contains("Unknown describe argument"));
    }
}
