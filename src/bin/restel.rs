//! Restel CLI - runs execution groups from YAML definitions.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use restel::{
    CapturedPayloads, DefinitionLoader, DefinitionRegistry, DefinitionSet,
    DefinitionStore, Engine, RunOutcome, SelfReferencePolicy, TestRunReport,
};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Restel - REST test orchestration over YAML definitions.
#[derive(Parser, Debug)]
#[command(name = "restel", version, about)]
struct Cli {
    /// Definition file or directory path.
    #[arg(short = 'p', long = "path")]
    definition_path: Option<String>,

    /// Execution to run (repeatable). Ancestors run first. Defaults to
    /// every enabled execution.
    #[arg(short = 'e', long = "exec")]
    executions: Vec<String>,

    /// Base URL override for all executions.
    #[arg(short = 'b', long = "base-url", env = "RESTEL_BASE_URL")]
    base_url: Option<String>,

    /// Timeout in seconds per request.
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,

    /// Let assertions and functions reference the running execution.
    #[arg(long = "allow-self-reference")]
    allow_self_reference: bool,

    /// Directory to save the run report in.
    #[arg(short = 'r', long = "report-dir")]
    report_dir: Option<String>,

    /// Report output format.
    #[arg(long = "report-format", default_value = "json")]
    report_format: ReportFormat,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum ReportFormat {
    Json,
    Yaml,
    Text,
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(500) {
        Some((idx, _)) => format!("{}...(truncated)", &body[..idx]),
        None => body.to_string(),
    }
}

fn print_run_outcome(outcome: &RunOutcome, verbose: bool) {
    let status = if outcome.passed {
        "\x1b[32mPASS\x1b[0m"
    } else {
        "\x1b[31mFAIL\x1b[0m"
    };
    info!(
        "{} execution: {} ({} ms)",
        status, outcome.execution, outcome.duration_ms
    );

    for assertion in &outcome.assertions {
        let mark = if assertion.passed {
            "\x1b[32m✓\x1b[0m"
        } else {
            "\x1b[31m✗\x1b[0m"
        };
        info!(
            "  {} {} {}",
            mark, assertion.assert_type, assertion.actual
        );
        if let Some(message) = &assertion.message {
            error!("     \x1b[31mError: {}\x1b[0m", message);
        }
    }

    for (i, step) in outcome.steps.iter().enumerate() {
        let step_status = if step.success {
            "\x1b[32m✓\x1b[0m"
        } else {
            "\x1b[31m✗\x1b[0m"
        };
        info!(
            "  {}. {} {} ({} ms)",
            i + 1,
            step_status,
            step.name,
            step.duration_ms
        );

        if let Some(error) = &step.error {
            error!("     \x1b[31mError: {}\x1b[0m", error);
        }

        if verbose {
            debug!("     Request: {} {}", step.request.method, step.request.url);
            if let Some(body) = &step.request.body {
                debug!("     Request body: {}", truncate(body));
            }
            if let Some(response) = &step.response {
                debug!("     Response: Status {}", response.status);
                if let Some(body) = &response.body {
                    debug!("     Response body: {}", truncate(body));
                }
            }
        }
    }
}

fn save_run_report(
    report: &TestRunReport,
    report_dir: &Path,
    format: ReportFormat,
) -> Result<PathBuf> {
    if !report_dir.exists() {
        fs::create_dir_all(report_dir)?;
    }

    let timestamp = Utc::now().timestamp();

    let (filename, content) = match format {
        ReportFormat::Json => (
            format!("restel-{timestamp}.json"),
            serde_json::to_string_pretty(report)?,
        ),
        ReportFormat::Yaml => (
            format!("restel-{timestamp}.yaml"),
            serde_yaml::to_string(report)?,
        ),
        ReportFormat::Text => {
            let mut content = format!("Run at: {}\n", report.timestamp);
            content.push_str(&format!(
                "Duration: {} ms\n\n",
                report.total_duration_ms
            ));
            for run in &report.runs {
                content.push_str(&format!(
                    "{} ({}) {:?}, {} ms\n",
                    run.execution,
                    if run.passed { "PASS" } else { "FAIL" },
                    run.state,
                    run.duration_ms
                ));
                for assertion in &run.assertions {
                    content.push_str(&format!(
                        "  assert {} {} ({})\n",
                        assertion.assert_type,
                        assertion.actual,
                        if assertion.passed { "PASS" } else { "FAIL" }
                    ));
                    if let Some(message) = &assertion.message {
                        content.push_str(&format!("     Error: {message}\n"));
                    }
                }
                for (i, step) in run.steps.iter().enumerate() {
                    content.push_str(&format!(
                        "  {}. {} ({})\n",
                        i + 1,
                        step.name,
                        if step.success { "PASS" } else { "FAIL" }
                    ));
                    if let Some(error) = &step.error {
                        content.push_str(&format!("     Error: {error}\n"));
                    }
                }
            }
            (format!("restel-{timestamp}.txt"), content)
        }
    };

    let file_path = report_dir.join(filename);
    let mut file = File::create(&file_path)?;
    file.write_all(content.as_bytes())?;

    Ok(file_path)
}

fn load_definitions(definition_path: Option<String>) -> Result<DefinitionSet> {
    let mut loader = DefinitionLoader::new();

    let set = if let Some(path) = definition_path {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(anyhow!("Path does not exist: {}", path.display()));
        }
        loader
            .load_path(&path)
            .context(format!("Failed to load definitions: {}", path.display()))?
    } else {
        for path in ["test/definitions", "definitions"] {
            if Path::new(path).exists() {
                loader.add_path(path);
            }
        }
        loader.load_all()?
    };

    if set.executions.is_empty() {
        return Err(anyhow!("No executions found"));
    }
    Ok(set)
}

/// Names to run, ancestors first. Disabled executions are dropped.
fn plan(store: &DefinitionStore, requested: &[String]) -> Result<Vec<String>> {
    let requested: Vec<String> = if requested.is_empty() {
        store
            .executions()
            .filter(|e| e.enabled)
            .map(|e| e.name.clone())
            .collect()
    } else {
        requested.to_vec()
    };

    let mut names = Vec::new();
    for group in store.execution_order(&requested)? {
        if group.enabled {
            names.push(group.name.clone());
        } else {
            info!("Skipping disabled execution: {}", group.name);
        }
    }
    if names.is_empty() {
        return Err(anyhow!("No enabled executions to run"));
    }
    Ok(names)
}

async fn run_all(
    engine: &Engine,
    names: &[String],
    verbose: bool,
) -> (bool, Vec<RunOutcome>) {
    let mut captures = CapturedPayloads::new();
    let mut all_success = true;
    let mut passed = 0;
    let mut failed = 0;
    let mut outcomes = Vec::new();
    let total_start = Instant::now();

    info!("Running {} execution(s)...", names.len());
    for (idx, name) in names.iter().enumerate() {
        info!("Execution {}/{}: {}", idx + 1, names.len(), name);
        match engine.execute_test_run(name, &captures).await {
            Ok(outcome) => {
                print_run_outcome(&outcome, verbose);
                captures.merge(outcome.captures.clone());
                if outcome.passed {
                    passed += 1;
                } else {
                    all_success = false;
                    failed += 1;
                }
                outcomes.push(outcome);
            }
            Err(e) => {
                error!("\x1b[31mExecution error: {} - {}\x1b[0m", name, e);
                all_success = false;
                failed += 1;
            }
        }
    }

    info!(
        "Summary:\n  Total: {}\n  \x1b[32mPassed: {}\x1b[0m\n  \x1b[31mFailed: {}\x1b[0m\n  Duration: {} ms",
        passed + failed,
        passed,
        failed,
        total_start.elapsed().as_millis()
    );

    (all_success, outcomes)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.verbose);

    let set = load_definitions(args.definition_path)?;
    let mut store = DefinitionStore::from_set(set)?;
    if let Some(base_url) = args.base_url {
        store.set_base_url(base_url);
    }
    if let Some(timeout) = args.timeout {
        store.set_timeout(timeout);
    }
    debug!("Base URL: {}", store.base_config().base_url);

    let names = plan(&store, &args.executions)?;

    let policy = if args.allow_self_reference {
        SelfReferencePolicy::Allow
    } else {
        SelfReferencePolicy::Reject
    };
    let engine = Engine::builder(Arc::new(store))
        .self_reference(policy)
        .build();

    let total_start = Instant::now();
    let (success, runs) = run_all(&engine, &names, args.verbose).await;

    if let Some(dir) = args.report_dir.map(PathBuf::from) {
        let report = TestRunReport {
            runs,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            timestamp: Utc::now().to_rfc3339(),
        };
        match save_run_report(&report, &dir, args.report_format) {
            Ok(path) => info!("Report saved: {}", path.display()),
            Err(e) => error!("Failed to save report: {}", e),
        }
    }

    if !success {
        exit(1);
    }

    Ok(())
}
