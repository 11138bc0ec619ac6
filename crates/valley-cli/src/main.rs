use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use valley_contracts::catalog::StyleCatalog;
use valley_contracts::chat::{parse_intent, ChatNote, SESSION_HELP_COMMANDS};
use valley_contracts::events::SessionEventLog;
use valley_contracts::jobs::{ImageRef, Job, JobStatus, ResultAggregate};
use valley_engine::{
    default_transformer_registry, DirectoryGallery, Photo, Screen, StaticAuthority,
    StyleTransformer, Workflow, WorkflowConfig, WorkflowError,
};

#[derive(Debug, Parser)]
#[command(name = "valley", version, about = "Photo to art style transformation workflow")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one photo through a style or full transform, headless.
    Run(RunArgs),
    /// Interactive session driven by slash commands.
    Session(SessionArgs),
    /// List categories and styles.
    Catalog(CatalogArgs),
}

#[derive(Debug, Parser)]
#[command(group(ArgGroup::new("pick").required(true).args(["style", "full"])))]
struct RunArgs {
    #[arg(long)]
    photo: PathBuf,
    #[arg(long)]
    category: String,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    full: bool,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "dryrun")]
    transformer: String,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Retry every failed job once before saving.
    #[arg(long)]
    retry_failed: bool,
    #[arg(long, default_value_t = 600)]
    timeout_s: u64,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "dryrun")]
    transformer: String,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct CatalogArgs {
    #[arg(long)]
    json: bool,
}

const WAIT_TIMEOUT: Duration = Duration::from_secs(600);

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("valley error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Run(args) => run_headless(args),
        Command::Session(args) => {
            run_session(args)?;
            Ok(0)
        }
        Command::Catalog(args) => run_catalog(args),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn pick_transformer(name: &str) -> Result<Arc<dyn StyleTransformer>> {
    let registry = default_transformer_registry();
    match registry.get(name) {
        Some(transformer) => Ok(transformer),
        None => bail!(
            "unknown transformer '{name}' (available: {})",
            registry.names().join(", ")
        ),
    }
}

fn open_workflow(out: &Path, events: Option<&Path>, transformer: &str) -> Result<Workflow> {
    std::fs::create_dir_all(out).with_context(|| format!("failed creating {}", out.display()))?;
    let events_path = events
        .map(Path::to_path_buf)
        .unwrap_or_else(|| out.join("events.jsonl"));
    let workflow = Workflow::new(
        StyleCatalog::load()?,
        pick_transformer(transformer)?,
        Arc::new(StaticAuthority::authorized()),
        WorkflowConfig::from_env()?,
    )?;
    let workflow = workflow.with_event_log(SessionEventLog::create(events_path));
    tracing::debug!(
        transformer = workflow.transformer_name(),
        session = workflow.session_id(),
        "workflow opened"
    );
    Ok(workflow)
}

fn run_headless(args: RunArgs) -> Result<i32> {
    let photo = Photo::from_path(&args.photo)?;
    let mut flow = open_workflow(&args.out, args.events.as_deref(), &args.transformer)?;
    let timeout = Duration::from_secs(args.timeout_s.max(1));

    flow.select_category(&args.category)?;
    match args.style.as_deref() {
        Some(style) => flow.select_style(style)?,
        None => flow.select_full_transform()?,
    }
    if let (Some(style), Some(cost)) = (flow.style(), flow.estimated_cost()) {
        println!(
            "{}: {} transform(s), estimated ${cost:.2}",
            style.display_name(),
            style.job_count()
        );
    }
    flow.set_photo(photo)?;

    if !flow.wait_settled(timeout) {
        eprintln!("timed out after {}s waiting for transforms", timeout.as_secs());
        return Ok(2);
    }
    if args.retry_failed {
        for key in failed_keys(flow.results()) {
            flow.retry_job(&key)?;
        }
        if !flow.wait_settled(timeout) {
            eprintln!("timed out after {}s waiting for retries", timeout.as_secs());
            return Ok(2);
        }
    }

    let gallery = DirectoryGallery::new(&args.out);
    let stored = flow.save_to_gallery(&gallery)?;
    if let Some(results) = flow.results() {
        for job in results.jobs() {
            println!("{}", format_job_line(job, false));
        }
    }
    println!("Saved {} result(s) to {}", stored.entries.len(), gallery.entry_dir(&stored).display());
    Ok(exit_code_for(flow.results()))
}

fn failed_keys(results: Option<&ResultAggregate>) -> Vec<String> {
    results
        .map(|results| {
            results
                .jobs()
                .filter(|job| job.status == JobStatus::Failed)
                .map(|job| job.key.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// 0 when every job succeeded, 2 otherwise.
fn exit_code_for(results: Option<&ResultAggregate>) -> i32 {
    let all_succeeded = results.is_some_and(|results| {
        !results.is_empty() && results.jobs().all(|job| job.status == JobStatus::Succeeded)
    });
    if all_succeeded {
        0
    } else {
        2
    }
}

fn format_job_line(job: &Job, focused: bool) -> String {
    let marker = if focused { ">" } else { " " };
    let mut line = format!("{marker} {:<40} {:<9}", job.key, job.status.as_str());
    match (&job.image, &job.error) {
        (_, Some(error)) => line.push_str(&format!(" error: {error}")),
        (Some(ImageRef::Url(url)), None) => line.push_str(&format!(" {url}")),
        (Some(ImageRef::Inline { data, .. }), None) => {
            line.push_str(&format!(" inline image ({} bytes)", data.len()))
        }
        (None, None) => {}
    }
    if let Some(attribution) = &job.attribution {
        let credit = [attribution.artist.as_deref(), attribution.work.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");
        if !credit.is_empty() {
            line.push_str(&format!(" [{credit}]"));
        }
    }
    line
}

fn run_catalog(args: CatalogArgs) -> Result<i32> {
    let catalog = StyleCatalog::load()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&catalog_json(&catalog))?);
        return Ok(0);
    }
    for category in catalog.categories() {
        println!(
            "{} ({}) ${:.2} per transform",
            category.display_name, category.id, category.price_per_transform_usd
        );
        for style in &category.member_styles {
            let period = style.metadata.period.as_deref().unwrap_or("");
            println!("  {:<40} {} {period}", style.id, style.metadata.display_name);
        }
        println!(
            "  {:<40} {} ({} styles)",
            category.full_transform.id,
            category.full_transform.display_name,
            category.full_transform.members.len()
        );
    }
    Ok(0)
}

fn catalog_json(catalog: &StyleCatalog) -> Value {
    let categories: Vec<Value> = catalog
        .categories()
        .map(|category| {
            json!({
                "id": category.id,
                "display_name": category.display_name,
                "price_per_transform_usd": category.price_per_transform_usd,
                "full_transform": category.full_transform.id,
                "styles": category
                    .member_styles
                    .iter()
                    .map(|style| json!({
                        "id": style.id,
                        "display_name": style.metadata.display_name,
                        "period": style.metadata.period,
                    }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({ "categories": categories })
}

fn run_session(args: SessionArgs) -> Result<()> {
    let mut flow = open_workflow(&args.out, args.events.as_deref(), &args.transformer)?;
    let stdin = io::stdin();
    let mut line = String::new();

    println!("Valley session started. Type /help for commands.");
    print_categories(flow.catalog());

    loop {
        let before = flow.screen();
        flow.pump();
        announce_screen_change(&flow, before);

        print!("[{}] > ", flow.screen());
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        let before = flow.screen();
        match intent.action.as_str() {
            "noop" => continue,
            "help" => println!("Commands: {}", SESSION_HELP_COMMANDS.join(" ")),
            "quit" => break,
            "list_categories" => print_categories(flow.catalog()),
            "select_category" => match intent.arg("category") {
                Some(category) => report(flow.select_category(category)),
                None => println!("/category requires an id"),
            },
            "set_photo" => match intent.arg("path") {
                Some(path) => match Photo::from_path(Path::new(path)) {
                    Ok(photo) => report(flow.set_photo(photo)),
                    Err(err) => println!("Photo rejected: {err:#}"),
                },
                None => println!("/photo requires a path"),
            },
            "select_style" => match intent.arg("style") {
                Some(style) => report(flow.select_style(style)),
                None => println!("/style requires an id"),
            },
            "select_full_transform" => report(flow.select_full_transform()),
            "back" => report(flow.back()),
            "reset" => {
                let generation = flow.reset();
                println!("Session reset (generation {generation}).");
            }
            "retry" => match intent.arg("key") {
                Some(key) => report(flow.retry_job(key)),
                None => println!("/retry requires a key"),
            },
            "focus" => match intent.arg("key") {
                Some(key) => report(flow.focus_key(key)),
                None => println!("/focus requires a key"),
            },
            "focus_next" => {
                flow.focus_next();
                print_status(&flow);
            }
            "focus_prev" => {
                flow.focus_prev();
                print_status(&flow);
            }
            "status" => print_status(&flow),
            "wait" => {
                if flow.wait_settled(WAIT_TIMEOUT) {
                    print_status(&flow);
                } else {
                    println!("Nothing settled yet.");
                }
            }
            "annotate" => match (intent.arg("key"), intent.arg("text")) {
                (Some(key), Some(text)) => report(flow.annotate(key, ChatNote::new("user", text))),
                _ => println!("/note requires a key and text"),
            },
            "chat" => match (flow.focused_key(), intent.arg("text")) {
                (Some(key), Some(text)) => {
                    report(flow.annotate(&key, ChatNote::new("user", text)))
                }
                _ => println!("No result in focus. Type /help for commands."),
            },
            "save_gallery" => {
                let root = intent
                    .arg("path")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| args.out.join("gallery"));
                let gallery = DirectoryGallery::new(root);
                match flow.save_to_gallery(&gallery) {
                    Ok(stored) => println!("Saved to {}", gallery.entry_dir(&stored).display()),
                    Err(err) => println!("Save failed: {err:#}"),
                }
            }
            "sign_out" => {
                flow.sign_out()?;
                println!("Signed out.");
                break;
            }
            "unknown" => println!(
                "Unknown command: /{}",
                intent.arg("command").unwrap_or_default()
            ),
            other => println!("Unhandled action: {other}"),
        }
        announce_screen_change(&flow, before);
    }
    Ok(())
}

fn report(result: std::result::Result<(), WorkflowError>) {
    match result {
        Ok(()) => {}
        Err(err) if err.is_benign() => println!("Ignored: {err}"),
        Err(err) => println!("Error: {err}"),
    }
}

fn announce_screen_change(flow: &Workflow, before: Screen) {
    let now = flow.screen();
    if now == before {
        return;
    }
    match now {
        Screen::StyleAndPhoto => {
            if let Some(category) = flow.category() {
                println!(
                    "{}: upload a photo and pick a {} (or /full).",
                    category.display_name, category.style_noun
                );
            }
        }
        Screen::Processing => {
            if let Some(style) = flow.style() {
                println!("Transforming with {}...", style.display_name());
            }
        }
        Screen::Result => print_status(flow),
        Screen::CategorySelect => {}
    }
}

fn print_categories(catalog: &StyleCatalog) {
    for category in catalog.categories() {
        println!(
            "  {:<12} {} ({} styles)",
            category.id,
            category.display_name,
            category.member_styles.len()
        );
    }
}

fn print_status(flow: &Workflow) {
    let category = flow
        .category()
        .map(|category| category.display_name.as_str())
        .unwrap_or("-");
    println!(
        "Screen: {} | category: {category} | generation {}",
        flow.screen(),
        flow.generation()
    );
    let Some(results) = flow.results() else {
        println!("No results.");
        return;
    };
    let focused = flow.focused_key();
    for job in results.jobs() {
        println!("{}", format_job_line(job, focused.as_deref() == Some(job.key.as_str())));
        for note in flow.annotations().notes(&job.key) {
            println!("      {}: {}", note.speaker, note.text);
        }
    }
    let counts = results.counts();
    println!(
        "{} succeeded, {} failed, {} pending, {} running",
        counts.succeeded, counts.failed, counts.pending, counts.running
    );
}
