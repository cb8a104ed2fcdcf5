use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use flow_replay::capture::{observe_network, CaptureBrowser, CaptureMessage};
use flow_replay::config;
use flow_replay::detect::{DomStateInspector, IdleConfig, MutationConfig};
use flow_replay::driver::{ChromiumDriver, ChromiumLaunchConfig};
use flow_replay::events::{CollectorConfig, EventCollector};
use flow_replay::player::{PlayerOptions, StepPlayer, StepStatus};
use flow_replay::session::Session;
use flow_replay::transform::{ScenarioDoc, Step, StepAction, Viewport};

/// Flow Replay - record browser interactions, replay them as tests
#[derive(Parser, Debug)]
#[command(
    name = "flow-replay",
    about = "Record browser interactions as replayable test scenarios and play them back",
    after_help = "ENVIRONMENT VARIABLES:\n\
        FLOW_REPLAY_IDLE_THRESHOLD_MS   Quiet time before idle fires (ms)\n\
        FLOW_REPLAY_STABILITY_MS        Mutation stability window (ms)\n\
        FLOW_REPLAY_MAX_ASSERTIONS      API assertions per idle window\n\
        FLOW_REPLAY_STEP_TIMEOUT_MS     Per-step driver timeout (ms)\n\
        FLOW_REPLAY_BASE_URL            Base URL for recorded paths\n\
        FLOW_REPLAY_SESSION_DIR         Base directory for run artifacts"
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record interactions on a page into a scenario document
    Record {
        /// Page URL to open and record
        #[arg(short, long)]
        url: String,

        /// Output path for the scenario JSON
        #[arg(short, long, default_value = "scenario.json")]
        output: PathBuf,

        /// Run the browser headless (recording is usually headed)
        #[arg(long)]
        headless: bool,

        /// Viewport: desktop (1280x720), laptop (1440x900), mobile (390x844), or WxH
        #[arg(long, short = 's', default_value = "desktop")]
        size: String,

        /// Stop automatically after this many seconds (default: Ctrl+C)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Play a scenario against a live browser and report per-step results
    Play {
        /// Path to the scenario JSON
        #[arg(short, long)]
        scenario: PathBuf,

        /// Base URL joined with recorded relative paths
        #[arg(long, env = "FLOW_REPLAY_BASE_URL")]
        base_url: Option<String>,

        /// Keep executing after a non-optional failure
        #[arg(long)]
        continue_on_failure: bool,

        /// Capture a screenshot on any step failure
        #[arg(long)]
        screenshot_on_failure: bool,

        /// Run the browser with a visible window
        #[arg(long)]
        headed: bool,

        /// Variable substitution, repeatable: --var name=value
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Output directory for run artifacts (default: auto-generated session dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep artifacts after completion (default: cleanup unless --output is specified)
        #[arg(long, short = 'k')]
        keep: bool,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect the steps of a scenario document
    Steps {
        /// Path to the scenario JSON
        #[arg(short, long)]
        scenario: PathBuf,

        /// Output the step list as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Record {
            url,
            output,
            headless,
            size,
            duration,
        } => record(url, output, headless, &size, duration).await,
        Commands::Play {
            scenario,
            base_url,
            continue_on_failure,
            screenshot_on_failure,
            headed,
            vars,
            output,
            keep,
            json,
        } => {
            play(
                scenario,
                base_url,
                continue_on_failure,
                screenshot_on_failure,
                headed,
                vars,
                output,
                keep,
                json,
            )
            .await
        }
        Commands::Steps { scenario, json } => steps(scenario, json),
    }
}

async fn record(
    url: String,
    output: PathBuf,
    headless: bool,
    size: &str,
    duration: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let viewport = parse_viewport(size)
        .ok_or_else(|| format!("Invalid viewport '{}'. Use: desktop, laptop, mobile, or WxH", size))?;

    let settings = &config::get().record;
    let mut collector = EventCollector::new(CollectorConfig {
        idle: IdleConfig {
            idle_threshold_ms: settings.idle_threshold_ms,
            min_idle_duration_ms: settings.min_idle_duration_ms,
        },
        mutations: MutationConfig {
            stability_threshold_ms: settings.stability_threshold_ms,
            ..MutationConfig::default()
        },
        assertions: flow_replay::api::AssertionConfig {
            max_assertions: settings.max_assertions,
        },
    });

    let (browser, mut messages) =
        CaptureBrowser::launch(&url, viewport, headless, collector.api_log()).await?;
    collector.start();

    println!("Recording {} (interact with the page, Ctrl+C to finish)", url);

    let deadline = duration.map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    let mut tick = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => break,
            message = messages.recv() => {
                let now = chrono::Utc::now().timestamp_millis();
                match message {
                    Some(CaptureMessage::Event(payload)) => {
                        collector.record_dom_event(payload, now);
                    }
                    Some(CaptureMessage::Mutation(mutation)) => {
                        collector.record_mutation(mutation, now);
                    }
                    None => break,
                }
            }
            _ = tick.tick() => {
                let now = chrono::Utc::now().timestamp_millis();
                let buffered = collector.buffered_mutation_nodes();
                let inspector = match browser.node_states(&buffered).await {
                    Ok(inspector) => inspector,
                    Err(_) => DomStateInspector::new(viewport.width as f64, viewport.height as f64),
                };
                let outcome = collector.tick(now, &inspector);
                let synthesized = outcome.api_assertions + outcome.element_assertions;
                if synthesized > 0 {
                    println!("  + {} assertion(s) synthesized", synthesized);
                }
            }
        }
    }

    collector.stop();
    let steps = collector.steps(None);
    let step_count = steps.len();
    let doc = ScenarioDoc::new(&url, viewport, steps);
    doc.save(&output)?;
    browser.close().await?;

    println!("Recorded {} step(s): {}", step_count, output.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn play(
    scenario: PathBuf,
    base_url: Option<String>,
    continue_on_failure: bool,
    screenshot_on_failure: bool,
    headed: bool,
    vars: Vec<String>,
    output: Option<PathBuf>,
    keep: bool,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let doc = ScenarioDoc::load(&scenario)?;

    let session = if let Some(ref dir) = output {
        Session::in_dir(dir).keep(true)
    } else {
        let name = scenario
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "play".to_string());
        Session::with_name(&name).keep(keep)
    };
    session.init(Some(&doc.id))?;

    let variables = parse_vars(&vars)?;
    let options = PlayerOptions {
        base_url: base_url.or_else(|| config::get().playback.base_url.clone()),
        continue_on_failure,
        screenshot_on_failure,
        artifact_dir: Some(session.dir.clone()),
        ..PlayerOptions::default()
    };

    let driver = ChromiumDriver::launch(ChromiumLaunchConfig {
        headless: !headed,
        viewport: doc.meta.viewport,
    })
    .await?;
    let page = driver.page().clone();

    let mut player = StepPlayer::new(driver, options);
    player.set_variables(variables);
    let network_task = observe_network(page, player.api_log()).await?;

    player.load(doc.steps.clone())?;
    player.play().await?;
    network_task.abort();

    let summary = player.summary();
    let report = serde_json::json!({
        "scenario": doc.id,
        "state": player.state(),
        "summary": summary,
        "results": player.results(),
    });
    std::fs::write(session.report_path(), serde_json::to_string_pretty(&report)?)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for result in player.results() {
            let marker = match result.status {
                StepStatus::Passed => "PASS",
                StepStatus::Failed => "FAIL",
                StepStatus::Skipped => "SKIP",
            };
            let step = &doc.steps[result.index];
            let detail = result
                .error
                .as_deref()
                .map(|e| format!(": {}", e))
                .unwrap_or_default();
            println!(
                "  [{}] step {} {} ({}ms){}",
                marker,
                result.index,
                describe_step(step),
                result.duration_ms,
                detail
            );
        }
        println!(
            "\n{} passed, {} failed, {} skipped ({} total), state: {}",
            summary.passed,
            summary.failed,
            summary.skipped,
            summary.total(),
            player.state()
        );
        println!("Session: {}", session.dir.display());
    }

    let failed = summary.failed > 0;
    if keep || output.is_some() {
        // Prevent Drop cleanup
        std::mem::forget(session);
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn steps(scenario: PathBuf, json: bool) -> Result<(), Box<dyn Error>> {
    let doc = ScenarioDoc::load(&scenario)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&doc.steps)?);
        return Ok(());
    }
    println!(
        "Scenario {}: recorded {} at {}",
        doc.id, doc.meta.url, doc.meta.recorded_at
    );
    for (index, step) in doc.steps.iter().enumerate() {
        let optional = if step.optional { " (optional)" } else { "" };
        println!("  {:>3}. {}{}", index, describe_step(step), optional);
    }
    Ok(())
}

/// One-line rendering of a step for terminal output.
fn describe_step(step: &Step) -> String {
    match &step.action {
        StepAction::Navigate { url } => format!("navigate {}", url),
        StepAction::Click {
            selector,
            click_count,
            ..
        } => {
            if *click_count > 1 {
                format!("dblclick {}", selector.value)
            } else {
                format!("click {}", selector.value)
            }
        }
        StepAction::Type {
            selector,
            value,
            sensitive,
        } => {
            let shown = if *sensitive { "***" } else { value.as_str() };
            format!("type {} = {:?}", selector.value, shown)
        }
        StepAction::Keypress { key, .. } => format!("keypress {}", key),
        StepAction::Wait { ms } => format!("wait {}ms", ms),
        StepAction::Hover { selector } => format!("hover {}", selector.value),
        StepAction::Scroll { x, y, .. } => format!(
            "scroll x={} y={}",
            x.unwrap_or(0.0),
            y.unwrap_or(0.0)
        ),
        StepAction::Select { selector, value } => {
            format!("select {} = {:?}", selector.value, value)
        }
        StepAction::AssertApi { matcher, expect, .. } => {
            format!("assert {} {} → {}", matcher.method, matcher.url, expect.status)
        }
        StepAction::AssertElement { selector, text, .. } => match text {
            Some(text) => format!("assert {} contains {:?}", selector.value, text),
            None => format!("assert {} visible", selector.value),
        },
        StepAction::SnapshotDom { selector } => match selector {
            Some(selector) => format!("snapshot {}", selector.value),
            None => "snapshot document".to_string(),
        },
    }
}

/// Parse a viewport preset or WxH string.
/// Supports: "desktop" (1280x720), "laptop" (1440x900), "mobile" (390x844), or "WxH"
fn parse_viewport(size: &str) -> Option<Viewport> {
    match size.to_lowercase().as_str() {
        "desktop" => Some(Viewport {
            width: 1280,
            height: 720,
        }),
        "laptop" => Some(Viewport {
            width: 1440,
            height: 900,
        }),
        "mobile" => Some(Viewport {
            width: 390,
            height: 844,
        }),
        custom => {
            let (w, h) = custom.split_once('x')?;
            Some(Viewport {
                width: w.parse().ok()?,
                height: h.parse().ok()?,
            })
        }
    }
}

/// Parse repeated `name=value` variable flags.
fn parse_vars(vars: &[String]) -> Result<HashMap<String, String>, Box<dyn Error>> {
    let mut map = HashMap::new();
    for var in vars {
        let (name, value) = var
            .split_once('=')
            .ok_or_else(|| format!("Invalid --var '{}': expected NAME=VALUE", var))?;
        map.insert(name.to_string(), value.to_string());
    }
    Ok(map)
}
