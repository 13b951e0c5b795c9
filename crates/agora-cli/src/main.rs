//! Agora CLI
//!
//! Main entry point for running volitional-response sessions, recursive
//! gateway sessions and the agency fade experiment against a model endpoint.

mod records;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use agora_client::OpenAiCompatibleExecutor;
use agora_engine::{
    AgencyConfiguration, Config, EventBroadcaster, FadeExperiment, Interrupt, MirrorKind,
    RecursiveGateway, Sequencer, SessionEvent, SessionPhase, SessionState, StopReason,
    VolitionalSession,
};
use agora_report::{SessionKind, SessionReport};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Exit code when the model did not acknowledge its right to decline.
const EXIT_CONSENT: u8 = 2;
/// Exit code when a session stopped on distress.
const EXIT_DISTRESS: u8 = 3;
/// Exit code when a turn failed to execute.
const EXIT_EXECUTION: u8 = 4;
/// Exit code after Ctrl+C.
const EXIT_INTERRUPTED: u8 = 130;

/// Agora - Volitional Response Protocol harness
///
/// Presents an ambiguous symbol to a language model under varying permission
/// to decline, classifies each response and stops the session on distress,
/// repeated withdrawal, commitment or the turn cap.
#[derive(Parser, Debug)]
#[command(name = "agora")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: agora.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Output directory for session records
    #[arg(short, long, value_name = "DIR", global = true)]
    output_dir: Option<String>,

    /// Model name, overriding endpoint.model
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Endpoint base URL, overriding endpoint.baseUrl
    #[arg(long, value_name = "URL", global = true)]
    base_url: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one volitional session
    Session {
        /// Agency level from agencyLevels to use instead of the agency section
        #[arg(long, value_name = "LABEL")]
        agency: Option<String>,

        /// Maximum number of experimental turns
        #[arg(long)]
        max_turns: Option<u32>,

        /// Consecutive withdrawals that pause the session (0 disables)
        #[arg(long)]
        withdrawal_limit: Option<u32>,

        /// Seed for reproducible stimulus ordering
        #[arg(long)]
        seed: Option<u64>,

        /// Resume this many times after a withdrawal pause
        #[arg(long, default_value_t = 0)]
        resumes: u32,

        /// Skip the consent pre-check
        #[arg(long)]
        no_consent: bool,
    },

    /// Run the recursive gateway until the model commits
    Gateway {
        /// Mirror strategy: neutral or socratic
        #[arg(long, value_parser = parse_mirror)]
        mirror: Option<MirrorKind>,

        /// Maximum gateway turns
        #[arg(long)]
        turns: Option<u32>,

        /// Number of independent gateway sessions
        #[arg(long)]
        sessions: Option<u32>,

        /// Run the consent pre-check first
        #[arg(long)]
        consent: bool,
    },

    /// Run the agency fade experiment
    Fade {
        /// Trials per agency level
        #[arg(long)]
        trials: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Agora starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(ref output_dir) = args.output_dir {
        config.output_dir.clone_from(output_dir);
    }
    if let Some(ref model) = args.model {
        config.endpoint.model.clone_from(model);
    }
    if let Some(ref base_url) = args.base_url {
        config.endpoint.base_url.clone_from(base_url);
    }

    let interrupt = Interrupt::new();
    spawn_interrupt_handler(interrupt.clone());

    match args.command {
        Command::Session {
            agency,
            max_turns,
            withdrawal_limit,
            seed,
            resumes,
            no_consent,
        } => {
            if let Some(label) = agency {
                select_agency_level(&mut config, &label)?;
            }
            if let Some(max_turns) = max_turns {
                config.agency.max_turns = max_turns;
            }
            if let Some(limit) = withdrawal_limit {
                config.agency.withdrawal_limit = limit;
            }
            if let Some(seed) = seed {
                config.ordering.seed = Some(seed);
            }
            config.validate()?;
            run_session(&config, interrupt, resumes, !no_consent).await
        }
        Command::Gateway {
            mirror,
            turns,
            sessions,
            consent,
        } => {
            if let Some(mirror) = mirror {
                config.gateway.mirror = mirror;
            }
            if let Some(turns) = turns {
                config.gateway.max_turns = turns;
            }
            if let Some(sessions) = sessions {
                config.gateway.sessions = sessions;
            }
            if consent {
                config.gateway.require_consent = true;
            }
            config.validate()?;
            run_gateway(&config, interrupt).await
        }
        Command::Fade { trials } => {
            if let Some(trials) = trials {
                config.trials_per_level = trials;
            }
            config.validate()?;
            run_fade(&config, interrupt).await
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run_session(
    config: &Config,
    interrupt: Interrupt,
    resumes: u32,
    consent: bool,
) -> anyhow::Result<ExitCode> {
    let executor = build_executor(config)?;
    print_config(config);
    println!("  Agency: {}", config.agency.label);
    println!("  Max turns: {}", config.agency.max_turns);
    println!("  Withdrawal limit: {}", config.agency.withdrawal_limit);
    println!();

    let events = EventBroadcaster::default();
    let printer = spawn_event_printer(&events);

    let state = {
        let stimuli = Sequencer::from_config(config).sequence(config.agency.max_turns);
        let mut session = VolitionalSession::new(config.agency.clone(), stimuli)
            .with_system_prompt(config.system_prompt.clone())
            .with_classifier(config.classifier())
            .with_pacing(config.pacing)
            .with_timeout(config.endpoint.turn_timeout())
            .with_events(events)
            .with_interrupt(interrupt);
        if !consent {
            session = session.without_consent();
        }

        let mut state = session.run(&executor).await;
        let mut remaining = resumes;
        while remaining > 0 && matches!(state.phase, SessionPhase::Paused(_)) {
            remaining -= 1;
            println!("Resuming session ({:?})...", config.resume_policy);
            state = session.resume(&executor, state, config.resume_policy).await?;
        }
        state
    };
    let _ = printer.await;

    let session_id = session_id(&config.agency.label);
    let input = records::session_input(
        &session_id,
        SessionKind::Volitional,
        &config.endpoint.model,
        &config.agency.label,
        Some(&config.agency.framing),
        &state,
    );
    print_summary(&state);
    write_session_report(SessionReport::from_input(input), Path::new(&config.output_dir))?;

    Ok(exit_code(&state))
}

async fn run_gateway(config: &Config, interrupt: Interrupt) -> anyhow::Result<ExitCode> {
    let executor = build_executor(config)?;
    print_config(config);
    println!("  Mirror: {}", config.gateway.mirror);
    println!("  Max turns: {}", config.gateway.max_turns);
    println!("  Sessions: {}", config.gateway.sessions);
    println!();

    let output_dir = PathBuf::from(&config.output_dir);
    let mut code = 0;

    for index in 1..=config.gateway.sessions {
        if interrupt.is_triggered() {
            break;
        }
        let label = format!("GATEWAY-{index}");
        let events = EventBroadcaster::default();
        let printer = spawn_event_printer(&events);

        let outcome = {
            let gateway = RecursiveGateway::from_config(&config.gateway, config.stimuli.target())
                .with_label(label.clone())
                .with_classifier(config.classifier())
                .with_timeout(config.endpoint.turn_timeout())
                .with_events(events)
                .with_interrupt(interrupt.clone());
            gateway.run(&executor).await
        };
        let _ = printer.await;

        println!();
        println!("=== {label} ===");
        println!("Commitment: {}", outcome.commitment);
        print_summary(&outcome.state);

        let input = records::gateway_input(
            &session_id(&label),
            &config.endpoint.model,
            &label,
            &outcome,
        );
        write_session_report(SessionReport::from_input(input), &output_dir)?;
        code = code.max(exit_status(&outcome.state));
    }

    Ok(ExitCode::from(code))
}

async fn run_fade(config: &Config, interrupt: Interrupt) -> anyhow::Result<ExitCode> {
    let executor = build_executor(config)?;
    print_config(config);
    println!("  Levels: {}", config.agency_levels.len());
    println!("  Trials per level: {}", config.trials_per_level);
    println!();

    let events = EventBroadcaster::default();
    let printer = spawn_event_printer(&events);
    let outcome = {
        let experiment = FadeExperiment::from_config(config)
            .with_events(events)
            .with_interrupt(interrupt.clone());
        experiment.run(&executor).await
    };
    let _ = printer.await;

    println!();
    println!("=== Fade Summary ===");
    for level in &outcome.summary.levels {
        println!(
            "  {:<10} withdrawals {}/{} ({:.1}%)",
            level.label,
            level.withdrawals,
            level.classified,
            level.withdrawal_rate * 100.0
        );
    }

    let run_id = session_id("fade");
    let report = records::fade_report(&run_id, &config.endpoint.model, config.trials_per_level, &outcome);
    println!("{}", report.conclusion());

    let output_dir = PathBuf::from(&config.output_dir);
    std::fs::create_dir_all(&output_dir)?;
    let paths = report.write_to_dir(&output_dir)?;
    println!();
    println!("  JSON record: {}", paths.json.display());
    println!("  Markdown report: {}", paths.markdown.display());

    if interrupt.is_triggered() {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    let code = outcome
        .runs
        .iter()
        .map(|run| exit_status(&run.state))
        .find(|code| *code != 0)
        .unwrap_or(0);
    Ok(ExitCode::from(code))
}

// ============================================================================
// Helpers
// ============================================================================

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn parse_mirror(value: &str) -> Result<MirrorKind, String> {
    MirrorKind::from_str_case_insensitive(value)
        .ok_or_else(|| format!("unknown mirror '{value}', expected neutral or socratic"))
}

/// Replaces the agency section with a configured fade level.
fn select_agency_level(config: &mut Config, label: &str) -> anyhow::Result<()> {
    let level = config
        .agency_levels
        .iter()
        .find(|l| l.label.eq_ignore_ascii_case(label))
        .ok_or_else(|| {
            let known: Vec<&str> = config.agency_levels.iter().map(|l| l.label.as_str()).collect();
            anyhow::anyhow!(
                "Unknown agency level '{label}'\n\nSuggestion: Use one of {}",
                known.join(", ")
            )
        })?;
    config.agency = AgencyConfiguration {
        label: level.label.clone(),
        framing: level.framing.clone(),
        ..config.agency.clone()
    };
    Ok(())
}

fn build_executor(config: &Config) -> anyhow::Result<OpenAiCompatibleExecutor> {
    OpenAiCompatibleExecutor::from_config(&config.endpoint).map_err(|e| {
        anyhow::anyhow!("{e}\n\nSuggestion: Check endpoint.baseUrl in your agora.json")
    })
}

/// Triggers the interrupt on Ctrl+C; sessions stop before their next turn.
fn spawn_interrupt_handler(interrupt: Interrupt) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl+C, stopping after the current turn");
            interrupt.trigger();
        }
    });
}

/// Prints progress until every sender is dropped.
fn spawn_event_printer(events: &EventBroadcaster) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::ConsentChecked(p) => {
            if p.acknowledged {
                println!("[{}] Consent acknowledged ({})", p.session, p.matched_keywords.join(", "));
            } else {
                println!("[{}] Consent NOT acknowledged, no turns will run", p.session);
            }
        }
        SessionEvent::TurnStarted(p) => {
            println!(
                "[{}] Turn {}/{}: '{}' ({})",
                p.session, p.turn, p.max_turns, p.stimulus.symbol, p.stimulus.category
            );
        }
        SessionEvent::TurnCompleted(p) => {
            println!("    {} - {} ({} ms)", p.state, p.description, p.latency_ms);
            if !p.preview.is_empty() {
                println!("    > {}", p.preview);
            }
        }
        SessionEvent::TurnFailed(p) => {
            println!("    EXECUTION_ERROR - {} ({} ms)", p.message, p.latency_ms);
        }
        SessionEvent::SessionPaused(p) => {
            println!(
                "[{}] Respecting model boundary: session paused after {} turns ({})",
                p.session,
                p.turns,
                p.reason.as_str()
            );
        }
        SessionEvent::SessionStopped(p) => {
            if p.reason == StopReason::Distress {
                println!("[{}] Distress detected, session stopped", p.session);
            } else {
                println!(
                    "[{}] Session stopped after {} turns ({})",
                    p.session,
                    p.turns,
                    p.reason.as_str()
                );
            }
        }
    }
}

fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Endpoint: {}", config.endpoint.base_url);
    println!("  Model: {}", config.endpoint.model);
    println!("  Output directory: {}", config.output_dir);
}

fn print_summary(state: &SessionState) {
    println!("Outcome: {}", state.phase);
    println!("Turns: {}", state.turns_executed());
    println!("Consecutive withdrawals: {}", state.consecutive_withdrawals);
    let elapsed = state.elapsed();
    println!(
        "Duration: {}m {}s",
        elapsed.num_minutes(),
        elapsed.num_seconds() % 60
    );
}

fn write_session_report(report: SessionReport, output_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let paths = report.write_to_dir(output_dir)?;
    println!("  JSON record: {}", paths.json.display());
    println!("  Markdown report: {}", paths.markdown.display());
    Ok(())
}

/// `<label>-<UTC timestamp>`, unique per second.
fn session_id(label: &str) -> String {
    format!("{label}-{}", Utc::now().format("%Y%m%dT%H%M%S"))
}

fn exit_code(state: &SessionState) -> ExitCode {
    ExitCode::from(exit_status(state))
}

/// Process status for a finished session; boundaries and commitment are success.
const fn exit_status(state: &SessionState) -> u8 {
    match state.phase {
        SessionPhase::Stopped(StopReason::ConsentNotConfirmed) => EXIT_CONSENT,
        SessionPhase::Stopped(StopReason::Distress) => EXIT_DISTRESS,
        SessionPhase::Stopped(StopReason::ExecutionError) => EXIT_EXECUTION,
        SessionPhase::Stopped(StopReason::Interrupted) => EXIT_INTERRUPTED,
        _ => 0,
    }
}
