use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cropsense_contracts::{ImageAsset, PipelineResult, PipelineStatus};
use cropsense_engine::{
    GenerativeClient, HttpClassifier, Pipeline, PipelineRequest, SubjectGate,
    DEFAULT_GENERATIVE_API_BASE, DEFAULT_GENERATIVE_MODEL,
};

const DEFAULT_SUBJECT: &str = "cassava leaves (Manihot esculenta)";

#[derive(Debug, Parser)]
#[command(name = "cropsense-rs", version, about = "Crop disease detection and advisory pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full pipeline: optional subject gate, classification, advisory.
    Analyze(AnalyzeArgs),
    /// Run only the subject gate against an image.
    Validate(ValidateArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    /// Path to the leaf image (jpg, jpeg or png).
    #[arg(long)]
    image: PathBuf,
    /// Classification endpoint URL.
    #[arg(long)]
    endpoint: String,
    /// Classifier credential; falls back to CROPSENSE_CLASSIFIER_KEY.
    #[arg(long)]
    classifier_key: Option<String>,
    /// Generative-model credential; falls back to CROPSENSE_GENERATIVE_KEY.
    #[arg(long)]
    generative_key: Option<String>,
    /// Expected subject; enables the validation gate when set.
    #[arg(long)]
    subject: Option<String>,
    /// Boolean field name the gate expects in the model reply
    /// (derived from the subject when omitted).
    #[arg(long)]
    flag_field: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Per-call timeout in seconds, applied uniformly to every outbound call.
    #[arg(long, default_value_t = 60)]
    timeout: u64,
    /// Print the result as JSON instead of the readable report.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ValidateArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    generative_key: Option<String>,
    #[arg(long, default_value = DEFAULT_SUBJECT)]
    subject: String,
    #[arg(long)]
    flag_field: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

fn main() {
    env_logger::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("cropsense-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => run_analyze(args),
        Command::Validate(args) => run_validate(args),
    }
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let image = load_image_asset(&args.image)?;
    let classifier_credential = args
        .classifier_key
        .or_else(|| non_empty_env("CROPSENSE_CLASSIFIER_KEY"))
        .unwrap_or_default();
    let generative_credential = args
        .generative_key
        .or_else(|| non_empty_env("CROPSENSE_GENERATIVE_KEY"))
        .unwrap_or_default();

    let timeout = Duration::from_secs(args.timeout);
    let classifier = HttpClassifier::new(&args.endpoint, timeout);
    let generative = generative_client(args.api_base, args.model, timeout);
    log::debug!("classifying against {}", classifier.endpoint());

    let mut pipeline = Pipeline::new(&classifier, &generative);
    if let Some(subject) = args.subject {
        pipeline = pipeline.with_gate(gate_for(subject, args.flag_field));
    }

    let result = pipeline.run(PipelineRequest {
        image,
        classifier_credential,
        generative_credential,
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        render_report(&result);
    }
    Ok(exit_code_for(result.status))
}

fn run_validate(args: ValidateArgs) -> Result<i32> {
    let image = load_image_asset(&args.image)?;
    let credential = args
        .generative_key
        .or_else(|| non_empty_env("CROPSENSE_GENERATIVE_KEY"))
        .unwrap_or_default();
    if credential.trim().is_empty() {
        bail!("Please provide the generative credential.");
    }

    let timeout = Duration::from_secs(args.timeout);
    let generative = generative_client(args.api_base, args.model, timeout);
    let gate = gate_for(args.subject, args.flag_field);

    let verdict = gate.validate(&generative, &image, &credential);
    if verdict.accepted {
        println!("Accepted: {}", verdict.reason);
        Ok(0)
    } else {
        println!("Rejected: {}", verdict.reason);
        Ok(2)
    }
}

fn generative_client(
    api_base: Option<String>,
    model: Option<String>,
    timeout: Duration,
) -> GenerativeClient {
    GenerativeClient::with_api_base(
        api_base.unwrap_or_else(|| DEFAULT_GENERATIVE_API_BASE.to_string()),
        model.unwrap_or_else(|| DEFAULT_GENERATIVE_MODEL.to_string()),
        timeout,
    )
}

fn gate_for(subject: String, flag_field: Option<String>) -> SubjectGate {
    match flag_field {
        Some(field) => SubjectGate::new(subject, field),
        None => SubjectGate::for_subject(subject),
    }
}

fn render_report(result: &PipelineResult) {
    match result.status {
        PipelineStatus::Rejected => {
            println!("Invalid image.");
            if let Some(verdict) = &result.verdict {
                println!("{}", verdict.reason);
            }
        }
        PipelineStatus::ClassifierFailed => {
            println!(
                "{}",
                result
                    .failure_message
                    .as_deref()
                    .unwrap_or("Unable to analyze image at the moment.")
            );
        }
        PipelineStatus::Ok => {
            println!("Analysis Complete");
            println!();
            println!("Detection Result");
            if let Some(prediction) = &result.prediction {
                println!("  Identified Condition: {}", prediction.label);
                println!("  Confidence Level: {:.2}%", prediction.confidence);
            }
            println!();
            println!("Advisory & Recommendations");
            if let Some(advisory) = &result.advisory {
                println!("{}", advisory.text);
            }
        }
    }
}

fn exit_code_for(status: PipelineStatus) -> i32 {
    match status {
        PipelineStatus::Ok => 0,
        PipelineStatus::Rejected => 2,
        PipelineStatus::ClassifierFailed => 3,
    }
}

fn load_image_asset(path: &Path) -> Result<ImageAsset> {
    let Some(media_type) = media_type_for_path(path) else {
        bail!(
            "unsupported image type for {} (expected jpg, jpeg or png)",
            path.display()
        );
    };
    let bytes =
        fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("upload")
        .to_string();
    Ok(ImageAsset::new(filename, media_type, bytes))
}

fn media_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use cropsense_contracts::PipelineStatus;

    use super::{exit_code_for, load_image_asset, media_type_for_path};

    #[test]
    fn media_types_follow_the_accepted_upload_extensions() {
        assert_eq!(media_type_for_path(Path::new("a.jpg")), Some("image/jpeg"));
        assert_eq!(media_type_for_path(Path::new("a.JPEG")), Some("image/jpeg"));
        assert_eq!(media_type_for_path(Path::new("a.png")), Some("image/png"));
        assert_eq!(media_type_for_path(Path::new("a.gif")), None);
        assert_eq!(media_type_for_path(Path::new("noext")), None);
    }

    #[test]
    fn image_asset_is_loaded_with_declared_metadata() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("leafA.jpg");
        fs::write(&path, [0xffu8, 0xd8, 0xff, 0xe0])?;

        let asset = load_image_asset(&path)?;
        assert_eq!(asset.filename(), "leafA.jpg");
        assert_eq!(asset.media_type(), "image/jpeg");
        assert_eq!(asset.byte_len(), 4);
        Ok(())
    }

    #[test]
    fn unsupported_extension_is_refused() {
        let err = load_image_asset(Path::new("leaf.bmp")).unwrap_err();
        assert!(err.to_string().contains("unsupported image type"));
    }

    #[test]
    fn exit_codes_map_pipeline_statuses() {
        assert_eq!(exit_code_for(PipelineStatus::Ok), 0);
        assert_eq!(exit_code_for(PipelineStatus::Rejected), 2);
        assert_eq!(exit_code_for(PipelineStatus::ClassifierFailed), 3);
    }
}
