use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use screenpilot::config::{self, AppConfig};
use screenpilot::evaluation::report::{self, BenchmarkReport};
use screenpilot::llm::registry::ProviderRegistry;

#[derive(Parser)]
#[command(name = "screenpilot", version, about = "Vision-language desktop automation agent")]
struct Cli {
    /// Path to config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the active provider
    #[arg(long, global = true)]
    provider: Option<String>,
    /// Override the active provider's model
    #[arg(long, global = true)]
    model: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Carry out one natural-language task on this desktop
    Run {
        /// What to do, e.g. "Open Notepad and type hello"
        task: String,
    },
    /// Check that the configured model endpoint is reachable
    Check,
    /// Run the benchmark task suite against the active model
    Bench {
        #[arg(long, default_value = "benchmarks/tasks.json")]
        tasks_file: PathBuf,
        /// Only run these task ids
        #[arg(long, value_delimiter = ',')]
        tasks: Vec<String>,
        /// Report path (default: report_<model>.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Compare saved benchmark reports
    Report {
        files: Vec<PathBuf>,
        /// Emit Markdown instead of a plain table
        #[arg(long)]
        markdown: bool,
    },
}

fn load(cli: &Cli) -> Result<AppConfig> {
    let mut cfg = config::load_config(cli.config.as_deref())?;
    if let Some(provider) = &cli.provider {
        cfg.llm.active_provider = provider.clone();
    }
    if let Some(model) = &cli.model {
        cfg.set_model(model.clone())?;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    screenpilot::init_tracing("info");

    let cli = Cli::parse();
    match &cli.command {
        Commands::Check => {
            let cfg = load(&cli)?;
            let registry = ProviderRegistry::from_config(&cfg)?;
            let model = registry.get_active()?;
            model
                .ping()
                .await
                .with_context(|| format!("provider '{}' is not reachable", model.name()))?;
            println!("{} ok ({})", model.name(), model.model());
            if let Ok(models) = model.list_models().await {
                for m in models {
                    println!("  {m}");
                }
            }
        }
        Commands::Report { files, markdown } => {
            if files.is_empty() {
                anyhow::bail!("no report files given");
            }
            let reports = files
                .iter()
                .map(|f| BenchmarkReport::load(f))
                .collect::<Result<Vec<_>, _>>()?;
            if *markdown {
                print!("{}", report::markdown_report(&reports));
            } else {
                print!("{}", report::comparison_table(&reports));
            }
        }
        Commands::Run { task } => {
            let cfg = load(&cli)?;
            desktop::run(&cfg, task).await?;
        }
        Commands::Bench {
            tasks_file,
            tasks,
            output,
        } => {
            let cfg = load(&cli)?;
            desktop::bench(&cfg, tasks_file, tasks, output.clone()).await?;
        }
    }
    Ok(())
}

#[cfg(feature = "desktop")]
mod desktop {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use anyhow::Result;

    use screenpilot::agent_engine::engine::AgentEngine;
    use screenpilot::agent_engine::event_bus::{
        self, AgentEvent, EventBus, EventReceiver, StopHandle,
    };
    use screenpilot::agent_engine::loop_control::LoopSettings;
    use screenpilot::config::AppConfig;
    use screenpilot::errors::PilotResult;
    use screenpilot::evaluation::benchmark::{Benchmark, BenchmarkTask, SystemVerifier};
    use screenpilot::evaluation::report;
    use screenpilot::executor::dispatcher::InputDispatcher;
    use screenpilot::executor::input::EnigoInput;
    use screenpilot::llm::provider::VisionModel;
    use screenpilot::llm::registry::ProviderRegistry;
    use screenpilot::perception::screenshot::XcapCapture;

    /// Ctrl-C flips the stop flag; the engine stops at the next step boundary.
    fn stop_on_ctrl_c() -> StopHandle {
        let stop = StopHandle::new();
        let flag = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping after the current step");
                flag.stop();
            }
        });
        stop
    }

    /// Prints one line per recorded step.
    async fn print_steps(mut rx: EventReceiver) {
        while let Some(event) = rx.recv().await {
            if let AgentEvent::StepRecorded { step } = event {
                println!(
                    "[{}] {} -> {} | {}",
                    step.index,
                    step.turn.action.kind(),
                    if step.executed_ok { "ok" } else { "failed" },
                    step.result_message
                );
            }
        }
    }

    fn engine(cfg: &AppConfig, model: Arc<dyn VisionModel>) -> PilotResult<AgentEngine> {
        let capture = Arc::new(XcapCapture::new(cfg.capture.jpeg_quality));
        let executor = Arc::new(InputDispatcher::new(EnigoInput::new(), &cfg.input));
        AgentEngine::from_config(cfg, model, capture, executor)
    }

    pub async fn run(cfg: &AppConfig, task: &str) -> Result<()> {
        let model = ProviderRegistry::from_config(cfg)?.get_active()?;
        let (tx, rx) = event_bus::channel();
        let printer = tokio::spawn(print_steps(rx));

        let mut engine = engine(cfg, model)?
            .with_events(EventBus::new(tx))
            .with_stop(stop_on_ctrl_c());
        let run = engine.run_task(task).await;
        drop(engine);
        let _ = printer.await;

        println!(
            "{}: {} ({} steps, {:.1}s)",
            if run.success() { "SUCCESS" } else { "FAILURE" },
            run.message,
            run.steps.len(),
            run.elapsed.as_secs_f64()
        );
        if !run.success() {
            std::process::exit(1);
        }
        Ok(())
    }

    pub async fn bench(
        cfg: &AppConfig,
        tasks_file: &Path,
        ids: &[String],
        output: Option<PathBuf>,
    ) -> Result<()> {
        let registry = ProviderRegistry::from_config(cfg)?;
        let model = registry.get_active()?;
        let benchmark = Benchmark::load(tasks_file)?;
        let stop: StopHandle = stop_on_ctrl_c();

        let make_engine = |task: &BenchmarkTask, events: EventBus| -> PilotResult<AgentEngine> {
            let engine = engine(cfg, Arc::clone(&model))?;
            let settings = LoopSettings {
                max_steps: task.max_steps.max(1),
                ..engine.settings()
            };
            Ok(engine
                .with_settings(settings)
                .with_events(events)
                .with_stop(stop.clone()))
        };

        let scored = benchmark
            .run_all(
                ids,
                make_engine,
                &SystemVerifier,
                &stop,
                model.model(),
                registry.active_name(),
            )
            .await?;
        print!("{}", report::comparison_table(std::slice::from_ref(&scored)));

        let path = output.unwrap_or_else(|| PathBuf::from(scored.default_file_name()));
        scored.save(&path)?;
        println!("report written to {}", path.display());
        Ok(())
    }
}

#[cfg(not(feature = "desktop"))]
mod desktop {
    use std::path::{Path, PathBuf};

    use anyhow::{bail, Result};

    use screenpilot::config::AppConfig;

    const NEEDS_DESKTOP: &str =
        "this build has no screen capture or input backend; rebuild with `--features desktop`";

    pub async fn run(_cfg: &AppConfig, _task: &str) -> Result<()> {
        bail!(NEEDS_DESKTOP)
    }

    pub async fn bench(
        _cfg: &AppConfig,
        _tasks_file: &Path,
        _ids: &[String],
        _output: Option<PathBuf>,
    ) -> Result<()> {
        bail!(NEEDS_DESKTOP)
    }
}
