use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use fxforge_lib::commands::bundle::{read_reference_zip, script_name_from_archive};
use fxforge_lib::commands::config::{load_config, update_config};
use fxforge_lib::commands::logs::{logs_dir, TranscriptLogger};
use fxforge_lib::request::{image_data_uri, Framework, LibType, MysqlType};
use fxforge_lib::util::expand_tilde;
use fxforge_lib::{
    GenerationClient, GenerationEvent, GenerationMode, GenerationRequest, GenerationSource,
    ScriptBundle,
};

#[derive(Parser)]
#[command(name = "fxforge", version, about = "Generate FiveM scripts with a streaming AI backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a script and write its files
    Generate(GenerateArgs),
    /// Show or change saved defaults
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct GenerateArgs {
    /// zip, text, image, tebex or video
    #[arg(value_parser = wire_value::<GenerationMode>)]
    mode: GenerationMode,

    /// Script name; zip mode defaults to the archive name
    #[arg(long)]
    name: Option<String>,

    #[arg(long, value_parser = wire_value::<Framework>)]
    framework: Option<Framework>,

    #[arg(long, value_parser = wire_value::<MysqlType>)]
    mysql: Option<MysqlType>,

    #[arg(long, value_parser = wire_value::<LibType>)]
    lib: Option<LibType>,

    #[arg(long)]
    description: Option<String>,

    /// Reference archive for zip mode
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Screenshot for image mode; repeatable
    #[arg(long = "image")]
    images: Vec<PathBuf>,

    /// Store page (tebex mode) or video link (video mode)
    #[arg(long)]
    url: Option<String>,

    /// Extra context for tebex and video modes
    #[arg(long)]
    context: Option<String>,

    /// Output directory
    #[arg(long)]
    out: Option<String>,

    /// Write a .zip instead of a folder
    #[arg(long)]
    zip: bool,

    #[arg(long, env = "FXFORGE_ENDPOINT")]
    endpoint: Option<String>,

    #[arg(long, env = "FXFORGE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Set(SetArgs),
}

#[derive(Args)]
struct SetArgs {
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long, value_parser = wire_value::<Framework>)]
    framework: Option<Framework>,
    #[arg(long, value_parser = wire_value::<MysqlType>)]
    mysql: Option<MysqlType>,
    #[arg(long, value_parser = wire_value::<LibType>)]
    lib: Option<LibType>,
    #[arg(long)]
    out: Option<String>,
}

/// Parses a CLI value using the same spelling as the request body.
fn wire_value<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| format!("unknown value `{raw}`"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fxforge=info,fxforge_lib=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => generate(args).await,
        Command::Config { action } => config(action),
    }
}

fn config(action: ConfigAction) -> anyhow::Result<()> {
    let config = match action {
        ConfigAction::Show => load_config(),
        ConfigAction::Set(set) => update_config(|cfg| {
            if let Some(endpoint) = set.endpoint {
                cfg.endpoint = Some(endpoint);
            }
            if let Some(key) = set.api_key {
                cfg.api_key = Some(key);
            }
            if let Some(framework) = set.framework {
                cfg.framework = framework;
            }
            if let Some(mysql) = set.mysql {
                cfg.mysql_type = mysql;
            }
            if let Some(lib) = set.lib {
                cfg.lib_type = lib;
            }
            if let Some(out) = set.out {
                cfg.output_dir = Some(out);
            }
        })
        .context("saving config")?,
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn build_source(args: &GenerateArgs) -> anyhow::Result<GenerationSource> {
    let source = match args.mode {
        GenerationMode::Zip => {
            let Some(archive) = &args.reference else {
                bail!("zip mode needs --reference <archive>");
            };
            let reference_files = read_reference_zip(archive)
                .with_context(|| format!("reading {}", archive.display()))?;
            GenerationSource::Zip {
                reference_files,
                description: args.description.clone(),
            }
        }
        GenerationMode::Text => GenerationSource::Text {
            description: args.description.clone().unwrap_or_default(),
        },
        GenerationMode::Image => {
            let mut images = Vec::with_capacity(args.images.len());
            for path in &args.images {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                let file_name = path.file_name().unwrap_or_default().to_string_lossy();
                images.push(image_data_uri(&bytes, &file_name));
            }
            GenerationSource::Image { images }
        }
        GenerationMode::Tebex => GenerationSource::Tebex {
            tebex_url: args.url.clone().unwrap_or_default(),
            additional_context: args.context.clone(),
        },
        GenerationMode::Video => GenerationSource::Video {
            video_url: args.url.clone().unwrap_or_default(),
            additional_context: args.context.clone(),
        },
    };
    Ok(source)
}

fn write_bundle(
    bundle: &ScriptBundle,
    name: &str,
    out: &Path,
    zip: bool,
) -> fxforge_lib::Result<PathBuf> {
    if zip {
        bundle.write_zip(name, &out.join(format!("{name}.zip")))
    } else {
        bundle.write_dir(name, out)
    }
}

async fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let config = load_config();

    let name = args
        .name
        .clone()
        .or_else(|| args.reference.as_deref().and_then(script_name_from_archive))
        .unwrap_or_default();
    let mut preferences = config.preferences(name.trim());
    if let Some(framework) = args.framework {
        preferences.framework = framework;
    }
    if let Some(mysql) = args.mysql {
        preferences.mysql_type = mysql;
    }
    if let Some(lib) = args.lib {
        preferences.lib_type = lib;
    }

    let request = GenerationRequest::new(build_source(&args).await?, preferences);
    let endpoint = args
        .endpoint
        .clone()
        .unwrap_or_else(|| config.endpoint().to_string());
    let api_key = args.api_key.clone().or_else(|| config.api_key.clone());
    let client = GenerationClient::new(endpoint, api_key);

    let transcript = match logs_dir() {
        Some(dir) => TranscriptLogger::new(&dir).await,
        None => None,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = match &transcript {
        Some(logger) => client.start(request, logger.observe(tx)),
        None => client.start(request, tx),
    };

    let mut bundle = ScriptBundle::new();
    let mut failure = None;
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(GenerationEvent::Chunk { text }) => {
                    let _ = stdout.write_all(text.as_bytes());
                    let _ = stdout.flush();
                }
                Some(GenerationEvent::File { file }) => {
                    eprintln!("\n+ {} ({} bytes)", file.path, file.content.len());
                    bundle.upsert(file);
                }
                Some(GenerationEvent::Complete) => {}
                Some(GenerationEvent::Error { message }) => failure = Some(message),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !handle.is_cancelled() => {
                eprintln!("\naborting generation");
                handle.abort();
            }
        }
    }
    println!();
    handle.wait().await;

    if let Some(logger) = transcript {
        let path = logger.path().to_path_buf();
        logger.close().await;
        tracing::debug!(path = %path.display(), "transcript written");
    }

    let out = args
        .out
        .as_deref()
        .or(config.output_dir.as_deref())
        .unwrap_or(".");
    let written = (!bundle.is_empty())
        .then(|| write_bundle(&bundle, name.trim(), &expand_tilde(out), args.zip));
    if let Some(Ok(path)) = &written {
        eprintln!("wrote {} file(s) to {}", bundle.len(), path.display());
    }
    outcome(written, failure)
}

/// Exit status of a generation. A generation failure takes precedence over
/// a failure to write the files it produced.
fn outcome(
    written: Option<fxforge_lib::Result<PathBuf>>,
    failure: Option<String>,
) -> anyhow::Result<()> {
    match (written, failure) {
        (Some(Err(e)), Some(message)) => {
            eprintln!("could not write files: {e}");
            bail!(message)
        }
        (_, Some(message)) => bail!(message),
        (Some(Err(e)), None) => Err(e).context("writing files"),
        _ => Ok(()),
    }
}
