mod annotate;
mod bridge;
mod config;
mod document;
mod endpoint;
mod error;
mod logging;
mod naming;
mod predict;
mod raster;
mod render;
mod scene;
mod selection;
mod session;
mod storage;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::bridge::{CoreMessage, PredictionResult, TopKProbability, UiMessage};
use crate::config::Settings;
use crate::document::MemoryDocument;
use crate::endpoint::ModelEndpointStore;
use crate::logging::{LogConfig, LogFormat};
use crate::naming::to_android_resource_name;
use crate::raster::{rasterize, CancelToken, CANVAS_SIZE};
use crate::scene::{ExportFormat, NodeId, SceneGraph};
use crate::selection::expand;
use crate::session::{Flow, Session, UiSurface, MODEL_SAVED_NOTICE};
use crate::storage::FileStorage;

const PLUGIN_ROOT: &str = env!("CARGO_MANIFEST_DIR");

#[derive(Parser, Debug)]
#[command(
    name = "layer-predict",
    version,
    about = "Rasterize selected design layers for an image classifier and rename them from its predictions"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Log output format (logs always go to stderr)
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,
    /// Enable debug mode (verbose payload logging, taller UI)
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    debug: bool,
    /// Rasterize only the selected nodes, without expanding frames and groups
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    top_level_only: bool,
    /// Client storage file (default: <out dir>/client-storage.json)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,
    /// Model URL used when the document has none stored
    #[arg(long, global = true)]
    default_model_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Print plugin manifest JSON
    Manifest,
    /// Run the UI bridge: JSON messages in on stdin, out on stdout, one per line
    Serve(ServeArgs),
    /// List the candidate nodes a predict request would process
    Expand(DocumentArgs),
    /// Rasterize candidates to 224x224 images with a metadata sidecar
    Render(RenderArgs),
    /// Rename candidates from a predictions JSON file
    Apply(ApplyArgs),
    /// Attach top-k prediction links to one node
    Annotate(AnnotateArgs),
    /// Show or change the stored model URL
    #[command(name = "model-url", subcommand)]
    ModelUrl(ModelUrlCommand),
}

#[derive(Args, Debug)]
struct DocumentArgs {
    /// Scene document JSON
    #[arg(long, short = 'd')]
    document: PathBuf,
    /// Replace the document's selection (comma separated node ids)
    #[arg(long, value_delimiter = ',')]
    select: Vec<String>,
}

#[derive(Args, Debug)]
struct SaveArgs {
    /// Write the updated document here instead of over the input
    #[arg(long)]
    out: Option<PathBuf>,
    /// Do not write the updated document
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    doc: DocumentArgs,
    /// Write the document back to its input path when the session ends
    #[arg(long, action = ArgAction::SetTrue)]
    write: bool,
    /// Write the document to this path when the session ends
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    doc: DocumentArgs,
    /// Output directory (default: <out dir>/render)
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Image format of the rendered files
    #[arg(long, value_enum, default_value_t = ExportFormat::Jpg)]
    format: ExportFormat,
    /// Print the sidecar JSON to stdout instead of its path
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    #[command(flatten)]
    doc: DocumentArgs,
    /// Predictions JSON (array of {nodeId, prediction}, or a response message); '-' for stdin
    #[arg(long)]
    predictions: String,
    #[command(flatten)]
    save: SaveArgs,
}

#[derive(Args, Debug)]
struct AnnotateArgs {
    #[command(flatten)]
    doc: DocumentArgs,
    /// Node to annotate
    #[arg(long)]
    node: String,
    /// Top-k JSON (array of {className: {name, url}, probability}); '-' for stdin
    #[arg(long)]
    top_k: String,
    #[command(flatten)]
    save: SaveArgs,
}

#[derive(Subcommand, Debug)]
enum ModelUrlCommand {
    /// Print the model URL in effect for a document
    Get(DocumentRef),
    /// Persist a model URL for a document
    Set(SetModelUrlArgs),
    /// Forget the stored URL and fall back to the default
    Reset(DocumentRef),
    /// Remove every entry from client storage
    ClearAll,
}

#[derive(Args, Debug)]
struct DocumentRef {
    /// Scene document JSON (its name keys the storage entry)
    #[arg(long, short = 'd')]
    document: PathBuf,
}

#[derive(Args, Debug)]
struct SetModelUrlArgs {
    #[command(flatten)]
    doc: DocumentRef,
    url: String,
}

/// UI surface over stdio: messages to stdout, toasts to stderr.
#[derive(Debug, Default)]
struct StdioUi;

impl UiSurface for StdioUi {
    fn post(&self, message: &CoreMessage) -> Result<()> {
        let line = serde_json::to_string(message)?;
        let mut out = io::stdout().lock();
        writeln!(out, "{line}").context("failed to write to stdout")?;
        out.flush().context("failed to flush stdout")?;
        Ok(())
    }

    fn notify(&self, message: &str, timeout: Duration) {
        eprintln!("notice ({} ms): {message}", timeout.as_millis());
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli.global, Settings::from_env());
    logging::init_logging(
        &LogConfig::from_verbosity(cli.global.verbose, settings.debug)
            .with_format(cli.global.log_format),
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async {
        match cli.command {
            Commands::Commands => print_commands(),
            Commands::Manifest => print_manifest(&settings),
            Commands::Serve(args) => command_serve(args, &settings).await,
            Commands::Expand(args) => command_expand(args, &settings),
            Commands::Render(args) => command_render(args, &settings).await,
            Commands::Apply(args) => command_apply(args, &settings),
            Commands::Annotate(args) => command_annotate(args).await,
            Commands::ModelUrl(cmd) => command_model_url(cmd, &settings).await,
        }
    })
}

fn resolve_settings(global: &GlobalArgs, mut settings: Settings) -> Settings {
    if global.debug {
        settings.debug = true;
    }
    if global.top_level_only {
        settings.top_level_only = true;
    }
    if let Some(path) = &global.storage {
        settings.storage_path = path.clone();
    }
    if let Some(url) = global.default_model_url.as_deref().map(str::trim) {
        if !url.is_empty() {
            settings.default_model_url = url.to_string();
        }
    }
    settings
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({"name": "serve", "description": "Run the JSON-lines UI bridge over stdin/stdout."}),
        json!({"name": "expand", "description": "List candidate nodes for the current selection."}),
        json!({"name": "render", "description": "Rasterize candidates into 224x224 JPEGs + sidecar JSON."}),
        json!({"name": "apply", "description": "Rename candidates from classifier predictions."}),
        json!({"name": "annotate", "description": "Attach top-k prediction links to a node."}),
        json!({"name": "model-url", "description": "Get, set, reset or clear stored model URLs."}),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn print_manifest(settings: &Settings) -> Result<()> {
    let manifest_path = Path::new(PLUGIN_ROOT).join("manifest.json");
    let raw = fs::read_to_string(&manifest_path)
        .with_context(|| format!("manifest not found: {}", manifest_path.display()))?;
    let mut payload: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid manifest JSON: {}", manifest_path.display()))?;
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("effectiveUiHeight".to_string(), json!(settings.ui_height()));
        obj.insert(
            "effectiveDefaultModel".to_string(),
            json!(settings.default_model_url),
        );
    }
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn open_document(args: &DocumentArgs) -> Result<MemoryDocument> {
    let doc = MemoryDocument::load(&args.document)?;
    if !args.select.is_empty() {
        let ids = args
            .select
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(NodeId::from)
            .collect();
        doc.set_selection(ids)?;
    }
    info!(
        document = %args.document.display(),
        nodes = doc.node_count(),
        selected = doc.selection().len(),
        "document loaded"
    );
    Ok(doc)
}

fn save_document(doc: &MemoryDocument, input: &Path, save: &SaveArgs) -> Result<Option<PathBuf>> {
    if save.dry_run {
        return Ok(None);
    }
    let target = save.out.clone().unwrap_or_else(|| input.to_path_buf());
    doc.save(&target)?;
    Ok(Some(target))
}

async fn command_serve(args: ServeArgs, settings: &Settings) -> Result<()> {
    let doc = open_document(&args.doc)?;
    let filename = to_android_resource_name(&doc.name());
    let ui = StdioUi;
    let session = Session::new(
        &doc,
        FileStorage::new(&settings.storage_path),
        &ui,
        settings,
        filename,
    );
    session.start()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read ui message")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; ending session");
                break;
            }
        };
        let Some(line) = line else {
            info!("ui closed the stream");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message: UiMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "ignoring malformed ui message");
                continue;
            }
        };

        let cancel = CancelToken::new();
        let handled = session.handle(message, &cancel);
        tokio::pin!(handled);
        let flow = loop {
            tokio::select! {
                flow = &mut handled => break flow?,
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for interrupt")?;
                    warn!("interrupt received; cancelling in-flight request");
                    cancel.cancel();
                }
            }
        };
        if flow == Flow::Close {
            break;
        }
    }

    let target = args
        .out
        .clone()
        .or_else(|| args.write.then(|| args.doc.document.clone()));
    if let Some(path) = target {
        doc.save(&path)?;
        info!(path = %path.display(), "document saved");
    }
    Ok(())
}

fn command_expand(args: DocumentArgs, settings: &Settings) -> Result<()> {
    let doc = open_document(&args)?;
    let candidates = expand(
        &doc,
        &doc.selection(),
        &settings.excluded_types,
        settings.top_level_only,
    );
    let rows: Vec<Value> = candidates
        .iter()
        .filter_map(|id| doc.node(id))
        .map(|node| {
            json!({
                "id": node.id,
                "type": node.kind.wire_name(),
                "name": node.name,
                "width": node.width,
                "height": node.height,
                "child_count": node.children().map(<[NodeId]>::len),
            })
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "top_level_only": settings.top_level_only,
            "count": rows.len(),
            "candidates": rows,
        }))?
    );
    Ok(())
}

async fn command_render(args: RenderArgs, settings: &Settings) -> Result<()> {
    let doc = open_document(&args.doc)?;
    let selection = doc.selection();
    if selection.is_empty() {
        bail!("selection is empty; pass --select or save a selection in the document");
    }
    let filename = to_android_resource_name(&doc.name());
    let out_dir = args
        .out_dir
        .clone()
        .unwrap_or_else(|| settings.out_dir.join("render").join(&filename));
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create output directory: {}", out_dir.display()))?;

    let candidates = expand(
        &doc,
        &selection,
        &settings.excluded_types,
        settings.top_level_only,
    );
    let batch = rasterize(&doc, &candidates, args.format, &CancelToken::new()).await;

    let mut rows = Vec::with_capacity(batch.rendered.len());
    for item in &batch.rendered {
        let path = out_dir.join(format!(
            "{}.{}",
            sanitize_file_stem(item.node_id.as_str()),
            args.format.extension()
        ));
        fs::write(&path, &item.image_data_bytes)
            .with_context(|| format!("failed to write raster: {}", path.display()))?;
        let node = doc.node(&item.node_id);
        rows.push(json!({
            "node_id": item.node_id,
            "name": node.as_ref().map(|n| n.name.clone()),
            "type": node.as_ref().map(|n| n.kind.wire_name()),
            "path": abs_path(&path).display().to_string(),
            "bytes": item.image_data_bytes.len(),
        }));
    }
    let skipped: Vec<Value> = batch
        .skipped
        .iter()
        .map(|s| json!({"node_id": s.node_id, "reason": s.reason}))
        .collect();

    let sidecar_path = out_dir.join("render.json");
    let payload = json!({
        "render_sidecar_version": 1,
        "generated_at": timestamp_iso(),
        "document": abs_path(&args.doc.document).display().to_string(),
        "filename": filename,
        "canvas": {"w": CANVAS_SIZE, "h": CANVAS_SIZE, "units": "px", "format": args.format.extension()},
        "top_level_only": settings.top_level_only,
        "candidate_count": candidates.len(),
        "rendered": rows,
        "skipped": skipped,
    });
    write_json_pretty(&sidecar_path, &payload)?;

    if args.json {
        println!("{}", serde_json::to_string(&payload)?);
    } else {
        println!("{}", abs_path(&sidecar_path).display());
    }
    Ok(())
}

fn command_apply(args: ApplyArgs, settings: &Settings) -> Result<()> {
    let doc = open_document(&args.doc)?;
    let predictions = parse_predictions(&read_input(&args.predictions)?)?;
    let nodes = expand(&doc, &doc.selection(), &settings.excluded_types, false);
    let report = predict::apply_predictions(&doc, &nodes, &predictions);
    let saved = save_document(&doc, &args.doc.document, &args.save)?;

    let renamed: Vec<Value> = nodes
        .iter()
        .filter_map(|id| doc.node(id))
        .map(|node| json!({"id": node.id, "name": node.name}))
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "predicted": report.predicted,
            "exceptions": report.exceptions,
            "parents_relabelled": report.parents_relabelled,
            "missing": report.missing,
            "nodes": renamed,
            "saved_to": saved.map(|p| abs_path(&p).display().to_string()),
        }))?
    );
    Ok(())
}

async fn command_annotate(args: AnnotateArgs) -> Result<()> {
    let doc = open_document(&args.doc)?;
    let top_k = parse_top_k(&read_input(&args.top_k)?)?;
    let node_id = NodeId::from(args.node.trim());
    let report = annotate::annotate_top_k(&doc, &node_id, &top_k).await?;
    if !report.node_found {
        warn!(node = %node_id, "node not found; nothing annotated");
    }
    let saved = save_document(&doc, &args.doc.document, &args.save)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "node_id": node_id,
            "node_found": report.node_found,
            "removed": report.removed,
            "added": report.added,
            "failed": report.failed,
            "saved_to": saved.map(|p| abs_path(&p).display().to_string()),
        }))?
    );
    Ok(())
}

async fn command_model_url(cmd: ModelUrlCommand, settings: &Settings) -> Result<()> {
    let storage = FileStorage::new(&settings.storage_path);
    info!(path = %storage.path().display(), "client storage");
    let store_for = |document: &Path| -> Result<ModelEndpointStore<FileStorage>> {
        let doc = MemoryDocument::load(document)?;
        Ok(ModelEndpointStore::new(
            storage.clone(),
            to_android_resource_name(&doc.name()),
            settings.default_model_url.clone(),
        ))
    };

    match cmd {
        ModelUrlCommand::Get(doc) => {
            let store = store_for(&doc.document)?;
            println!("{}", store.current().await?);
        }
        ModelUrlCommand::Set(args) => {
            let url = args.url.trim();
            if url.is_empty() {
                bail!("model URL must not be empty; use `model-url reset` to clear it");
            }
            store_for(&args.doc.document)?.update(url).await?;
            eprintln!("{MODEL_SAVED_NOTICE}");
        }
        ModelUrlCommand::Reset(doc) => {
            println!("{}", store_for(&doc.document)?.reset().await?);
        }
        ModelUrlCommand::ClearAll => {
            let store = ModelEndpointStore::new(
                storage.clone(),
                String::new(),
                settings.default_model_url.clone(),
            );
            let remaining = store.clear_all().await?;
            eprintln!("All Client Storage data has been removed. {remaining} keys remaining.");
        }
    }
    Ok(())
}

fn parse_predictions(raw: &str) -> Result<Vec<PredictionResult>> {
    let value: Value = serde_json::from_str(raw).context("invalid predictions JSON")?;
    if value.is_array() {
        return serde_json::from_value(value).context("invalid predictions array");
    }
    match serde_json::from_value::<UiMessage>(value).context("invalid response message")? {
        UiMessage::Response { payload } => Ok(payload),
        other => bail!("expected a response message, got '{}'", other.kind()),
    }
}

fn parse_top_k(raw: &str) -> Result<Vec<TopKProbability>> {
    serde_json::from_str(raw).context("invalid top-k JSON")
}

fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read from stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("failed to read input file: {path}"))
}

fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

/// Node ids contain ':' and ';', which are awkward in file names.
fn sanitize_file_stem(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "node".to_string()
    } else {
        out
    }
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}
