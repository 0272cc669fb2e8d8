use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use floe_nav::controller::route_for_url;
use floe_nav::history::MemoryHistory;
use floe_nav::session::CookieString;
use floe_nav::{Controller, Event, EventHub, NavConfig, NavError, PanelKind, PanelRegistry, StatusHeader, ViewPanel};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;


#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read events: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: {source}")]
    BadEvent { line: usize, source: NavError },
    #[error(transparent)]
    Nav(#[from] NavError),
    #[error("failed to render output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "floe-nav", about = "Drive the floe navigation controller from the command line")]
struct Cli {
    /// Overrides `FLOE_BASE_URL`.
    #[arg(long)]
    base_url: Option<String>,

    /// Overrides `FLOE_SESSION_COOKIE`.
    #[arg(long)]
    session_cookie: Option<String>,

    /// Overrides `FLOE_LANDING_PANEL`.
    #[arg(long)]
    landing_panel: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed JSON-lines hub events through a controller, printing state after each.
    Replay(ReplayArgs),
    /// Print which panel a REST response for URL would be routed to.
    Route { url: String },
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Cookie string visible at startup, e.g. `floe-sesh=abc`.
    #[arg(long, default_value = "")]
    session: String,

    /// Navigate here before replaying: `<panel>` or `<panel>/<id>`.
    #[arg(long)]
    start: Option<String>,

    /// Extra panels to register beside the standard ones.
    #[arg(long = "panel")]
    extra_panels: Vec<String>,

    /// Event file; stdin when omitted.
    input: Option<PathBuf>,
}

fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(NavConfig::from_env()?, &cli)?;

    match cli.command {
        Command::Replay(args) => run_replay(config, args),
        Command::Route { url } => run_route(&url),
    }
}

fn run_route(url: &str) -> Result<(), CliError> {
    let panel = route_for_url(url).map(PanelKind::name);
    print_json(&json!({ "url": url, "panel": panel }))
}

fn run_replay(config: NavConfig, args: ReplayArgs) -> Result<(), CliError> {
    let hub = EventHub::new();
    let history = MemoryHistory::new();
    let panels = standard_panels(&args.extra_panels);
    let mut controller = Controller::new(
        config,
        hub.clone(),
        StatusHeader::new(),
        panels,
        history.clone(),
        &CookieString::new(args.session),
    );

    if let Some(start) = args.start.as_deref() {
        let (name, ids) = parse_start(start);
        controller.activate(name, &ids)?;
        print_json(&state_line(&controller, &history, Value::Null))?;
    }

    let reader: Box<dyn BufRead> = match args.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let Some(event) = parse_event_line(&line, index + 1)? else {
            continue;
        };
        hub.publish(event.clone());
        controller.pump();
        print_json(&state_line(&controller, &history, serde_json::to_value(&event)?))?;
    }

    tracing::debug!(subscribers = hub.subscriber_count(), "replay finished");
    Ok(())
}

/// Apply command-line overrides on top of the environment config.
fn resolve_config(env: NavConfig, cli: &Cli) -> Result<NavConfig, NavError> {
    NavConfig {
        base_url: cli.base_url.clone().unwrap_or(env.base_url),
        session_cookie: cli.session_cookie.clone().unwrap_or(env.session_cookie),
        landing_panel: cli.landing_panel.clone().unwrap_or(env.landing_panel),
    }
    .validated()
}

fn standard_panels(extra: &[String]) -> PanelRegistry {
    let mut panels = PanelRegistry::new();
    for kind in [PanelKind::Login, PanelKind::Flow, PanelKind::Dash, PanelKind::Settings] {
        panels.insert(kind.name(), Box::new(ViewPanel::new()));
    }
    for name in extra {
        panels.insert(name.as_str(), Box::new(ViewPanel::new()));
    }
    panels
}

/// Split `flow/42` into `("flow", ["42"])`; a bare name has no ids.
fn parse_start(raw: &str) -> (&str, Vec<String>) {
    match raw.split_once('/') {
        Some((name, id)) if !id.is_empty() => (name, vec![id.to_owned()]),
        Some((name, _)) => (name, Vec::new()),
        None => (raw, Vec::new()),
    }
}

fn parse_event_line(line: &str, number: usize) -> Result<Option<Event>, CliError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Event::from_json(trimmed)
        .map(Some)
        .map_err(|source| CliError::BadEvent { line: number, source })
}

fn state_line(controller: &Controller, history: &MemoryHistory, event: Value) -> Value {
    let snapshot = controller.snapshot();
    json!({
        "event": event,
        "active": snapshot.active,
        "authenticated": controller.is_authenticated(),
        "current_page": snapshot.current_page,
        "history": history.current(),
    })
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{rendered}")?;
    Ok(())
}
