use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pixelmind_contracts::models::ModelRegistry;
use pixelmind_engine::response::{error_response, respond, submit_response};
use pixelmind_engine::{
    Booth, ChatTranslator, EngineConfig, EngineError, ImageSource, SubmitRequest, Translator,
};
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pixelmind", version, about = "Photo-booth image generation jobs")]
struct Cli {
    /// Directory holding one workspace per session.
    #[arg(long, global = true)]
    workspace_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Submit(SubmitArgs),
    Status(SessionArgs),
    Wait(SessionArgs),
    Cleanup(SessionArgs),
    /// Queue and run a print of one downloaded result.
    Print(PrintArgs),
    Translate(TranslateArgs),
    Models,
}

#[derive(Debug, Parser)]
struct SubmitArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    instruction: String,
    #[arg(long)]
    num_images: Option<u32>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    source_lang: Option<String>,
    /// Poll until the generation finishes.
    #[arg(long)]
    wait: bool,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long)]
    session: String,
}

#[derive(Debug, Parser)]
struct PrintArgs {
    #[arg(long)]
    session: String,
    #[arg(long, default_value_t = 1)]
    index: usize,
    #[arg(long, default_value_t = 1)]
    copies: u32,
    /// Printer option as key=value; repeatable.
    #[arg(long = "option")]
    options: Vec<String>,
}

#[derive(Debug, Parser)]
struct TranslateArgs {
    #[arg(long)]
    text: String,
    #[arg(long)]
    source_lang: Option<String>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("pixelmind error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut config = EngineConfig::from_env();
    if let Some(root) = cli.workspace_root {
        config.workspace_root = root;
    }
    debug!(workspace_root = %config.workspace_root.display(), "configuration loaded");

    let body = match cli.command {
        Command::Submit(args) => run_submit(&config, args),
        Command::Status(args) => with_booth(&config, |booth| respond(booth.check_status(&args.session))),
        Command::Wait(args) => {
            with_booth(&config, |booth| respond(booth.wait_for_completion(&args.session)))
        }
        Command::Cleanup(args) => respond(
            Booth::local(&config)
                .cleanup(&args.session)
                .map(|()| json!({ "session_id": args.session })),
        ),
        Command::Print(args) => run_print(&config, args)?,
        Command::Translate(args) => run_translate(&config, args),
        Command::Models => list_models(),
    };
    emit(&body)
}

fn run_submit(config: &EngineConfig, args: SubmitArgs) -> Value {
    with_booth(config, |booth| {
        let mut request = SubmitRequest::new(ImageSource::Path(args.image), args.instruction);
        request.num_images = args.num_images;
        request.width = args.width;
        request.height = args.height;
        request.model = args.model;
        request.source_language = args.source_lang;
        let submitted = booth.submit(request);
        let waiting_on = match &submitted {
            Ok(job) if args.wait && job.failure.is_none() => Some(job.session_id.clone()),
            _ => None,
        };
        match waiting_on {
            Some(session_id) => respond(booth.wait_for_completion(&session_id)),
            None => submit_response(submitted),
        }
    })
}

fn run_print(config: &EngineConfig, args: PrintArgs) -> Result<Value> {
    let options = parse_options(&args.options)?;
    let booth = Booth::local(config);
    let printed = booth
        .enqueue_print(&args.session, args.index, args.copies, options)
        .and_then(|job_id| booth.process_print(job_id));
    Ok(respond(printed))
}

fn run_translate(config: &EngineConfig, args: TranslateArgs) -> Value {
    let translated = ChatTranslator::from_config(&config.translation).and_then(|translator| {
        if args.text.trim().is_empty() {
            return Err(EngineError::InvalidRequest("text is empty".to_string()));
        }
        translator.translate(&args.text, args.source_lang.as_deref())
    });
    respond(translated.map(|text| json!({ "original": args.text, "translated": text })))
}

fn list_models() -> Value {
    let registry = ModelRegistry::new(None);
    let models: Vec<Value> = registry
        .list()
        .map(|model| {
            json!({
                "name": model.name,
                "model_id": model.model_id,
                "label": model.label,
                "capabilities": model.capabilities,
            })
        })
        .collect();
    json!({ "success": true, "models": models })
}

fn with_booth(config: &EngineConfig, op: impl FnOnce(&Booth) -> Value) -> Value {
    match Booth::from_config(config) {
        Ok(booth) => op(&booth),
        Err(err) => error_response(&err),
    }
}

fn parse_options(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut options = BTreeMap::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("print option '{item}' is not key=value");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("print option '{item}' has an empty key");
        }
        options.insert(key.to_string(), value.trim().to_string());
    }
    Ok(options)
}

fn emit(body: &Value) -> Result<i32> {
    println!("{}", serde_json::to_string_pretty(body)?);
    let ok = body.get("success").and_then(Value::as_bool).unwrap_or(false);
    Ok(if ok { 0 } else { 1 })
}
