use clap::{Parser, Subcommand};
use caseflow::dsl::loader::load_workflow_from_yaml;
use caseflow::{CaseStatus, Engine, EngineConfig, EngineError, Priority, SystemClock, TaskStatus, Variables};
use caseflow::AlertMode;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Result, anyhow};
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate cases of a workflow in memory and print the resulting metrics
    Simulate {
        /// Path to the workflow YAML file
        #[arg(long, short)]
        file: PathBuf,

        /// Number of concurrent cases
        #[arg(long, default_value_t = 4)]
        cases: usize,

        /// Priority of every started case (low, normal, high, critical)
        #[arg(long, default_value = "normal", value_parser = parse_priority)]
        priority: Priority,

        /// Simulated work per task, in milliseconds
        #[arg(long, default_value_t = 50)]
        work_ms: u64,

        /// Interval between SLA checks, in milliseconds
        #[arg(long, default_value_t = 100)]
        sla_tick_ms: u64,

        /// Report each SLA severity only once per case or task
        #[arg(long)]
        edge_alerts: bool,

        /// Fail the first attempt of this task (repeatable)
        #[arg(long = "fail")]
        fail_tasks: Vec<String>,

        /// Initial variables (key=value)
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, Value)>,
    },

    /// Print a loaded workflow as JSON
    Inspect {
        /// Path to the workflow YAML file
        #[arg(long, short)]
        file: PathBuf,
    },
}

fn parse_key_val(s: &str) -> Result<(String, Value), String> {
    let pos = s.find('=').ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].to_string();
    let val_str = &s[pos + 1..];
    // Try parsing as JSON, otherwise treat as string
    let val = serde_json::from_str(val_str).unwrap_or_else(|_| Value::String(val_str.to_string()));
    Ok((key, val))
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    match s.to_ascii_lowercase().as_str() {
        "low" => Ok(Priority::Low),
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        "critical" => Ok(Priority::Critical),
        other => Err(format!("unknown priority `{}`", other)),
    }
}

/// Performs the actual work of a task on behalf of the simulator.
#[async_trait]
trait TaskRunner: Send + Sync {
    async fn run(&self, case_id: &str, task_id: &str, attempt: u32) -> Result<Variables>;
}

struct SimulatedRunner {
    work: Duration,
    failing: HashSet<String>,
}

#[async_trait]
impl TaskRunner for SimulatedRunner {
    async fn run(&self, case_id: &str, task_id: &str, attempt: u32) -> Result<Variables> {
        tokio::time::sleep(self.work).await;
        if attempt == 0 && self.failing.contains(task_id) {
            return Err(anyhow!("injected failure in {} for case {}", task_id, case_id));
        }
        Ok(Variables::from([(format!("{}_done", task_id), json!(true))]))
    }
}

const MAX_IDLE_TICKS: u32 = 50;

async fn drive_case(engine: Arc<Engine>, runner: Arc<dyn TaskRunner>, case_id: String, tick: Duration) -> Result<CaseStatus> {
    let worker = format!("sim-{}", case_id);
    let mut idle = 0;

    loop {
        let case = engine.get_case(&case_id).ok_or_else(|| anyhow!("case vanished: {}", case_id))?;
        if case.status.is_terminal() {
            return Ok(case.status);
        }

        let ready: Vec<(String, u32)> = case
            .task_instances
            .values()
            .filter(|t| t.status == TaskStatus::Ready)
            .map(|t| (t.task_id.clone(), t.retry_count))
            .collect();

        let mut jobs = JoinSet::new();
        for (task_id, attempt) in ready {
            match engine.assign_task(&case_id, &task_id, &worker) {
                Ok(()) => {}
                Err(EngineError::ResourceUnavailable { resource_id, .. }) => {
                    debug!(case_id = %case_id, task_id = %task_id, resource_id = %resource_id, "Waiting for resource");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            engine.start_task(&case_id, &task_id)?;

            let engine = engine.clone();
            let runner = runner.clone();
            let case_id = case_id.clone();
            jobs.spawn(async move {
                match runner.run(&case_id, &task_id, attempt).await {
                    Ok(output) => engine.complete_task(&case_id, &task_id, output),
                    Err(e) => engine.fail_task(&case_id, &task_id, &e.to_string()),
                }
            });
        }

        if jobs.is_empty() {
            idle += 1;
            if idle > MAX_IDLE_TICKS {
                warn!(case_id = %case_id, "Case made no progress, giving up");
                return Ok(case.status);
            }
            tokio::time::sleep(tick).await;
            continue;
        }
        idle = 0;

        while let Some(joined) = jobs.join_next().await {
            // A sibling may have aborted the case while this task was running.
            if let Err(e) = joined? {
                debug!(case_id = %case_id, error = %e, "Task outcome rejected");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { file } => {
            let workflow = load_workflow_from_yaml(&file)?;
            println!("{}", serde_json::to_string_pretty(&workflow)?);
        }

        Commands::Simulate { file, cases, priority, work_ms, sla_tick_ms, edge_alerts, fail_tasks, vars } => {
            let workflow = load_workflow_from_yaml(&file)?;
            info!("Loaded workflow: {}", workflow.id);

            let config = EngineConfig {
                alert_mode: if edge_alerts { AlertMode::Edge } else { AlertMode::Level },
                ..EngineConfig::default()
            };
            let mut engine = Engine::with_options(workflow, config, Arc::new(SystemClock))?;
            engine.on_case_complete(|case| info!(case_id = %case.id, duration = ?case.duration(), "Case completed"));
            engine.on_case_failed(|case| warn!(case_id = %case.id, error = ?case.error, "Case failed"));
            engine.on_alert(|alert| warn!(case_id = %alert.case_id, task_id = ?alert.task_id, severity = ?alert.severity, "{}", alert.message));
            let engine = Arc::new(engine);

            let runner: Arc<dyn TaskRunner> = Arc::new(SimulatedRunner {
                work: Duration::from_millis(work_ms),
                failing: fail_tasks.into_iter().collect(),
            });
            let tick = Duration::from_millis(sla_tick_ms);

            let sla_engine = engine.clone();
            let ticker = tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick);
                loop {
                    interval.tick().await;
                    sla_engine.check_slas();
                }
            });

            let input: Variables = vars.into_iter().collect();
            let mut drivers = JoinSet::new();
            for n in 0..cases {
                let case_id = format!("case-{}", n + 1);
                engine.start_case(&case_id, input.clone(), priority)?;
                drivers.spawn(drive_case(engine.clone(), runner.clone(), case_id, tick));
            }

            while let Some(joined) = drivers.join_next().await {
                match joined? {
                    Ok(status) => debug!(?status, "Case driver finished"),
                    Err(e) => error!("Case driver failed: {}", e),
                }
            }
            ticker.abort();

            println!("{}", serde_json::to_string_pretty(&engine.get_metrics())?);
        }
    }

    Ok(())
}
