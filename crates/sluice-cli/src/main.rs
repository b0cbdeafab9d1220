use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sluice_core::app::{JobLauncher, LocalJobLauncher, TaskStateCollectorService};
use sluice_core::config::RuntimeConfig;
use sluice_core::domain::{JobId, JobSpec, JobState, WorkUnit, WorkingState};
use sluice_core::error::{ListenerError, TaskFailure};
use sluice_core::impls::{EventBus, FsStateStore};
use sluice_core::ports::JobListener;
use sluice_core::runtime::{HandlerRegistry, TaskContext, TaskHandler};

const DEMO_TASK_TYPE: &str = "demo";

/// ローカル実行のデモと、外部ワーカーのタスク状態の取り込み
#[derive(Debug, Parser)]
#[command(name = "sluice", version)]
struct Cli {
    /// 実行時設定（JSON）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// デモジョブを実行し、最終状態を JSON で出力する
    Run(RunArgs),
    /// state store に書かれたタスク状態が揃うまで待ち、JobState を JSON で出力する
    Collect(CollectArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, default_value = "demo")]
    job_name: String,

    /// work unit 数
    #[arg(long, default_value_t = 2)]
    tasks: usize,

    /// 各タスクはこの回数だけ失敗してから成功する
    #[arg(long, default_value_t = 0)]
    fail_attempts: u32,

    /// `task.maxretries` を上書き
    #[arg(long)]
    max_retries: Option<u32>,

    /// 指定ミリ秒後にジョブを cancel する
    #[arg(long)]
    cancel_after_ms: Option<u64>,

    /// 確定したタスク状態の保存先
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CollectArgs {
    #[arg(long)]
    job_id: String,

    /// 待つタスク数
    #[arg(long)]
    tasks: usize,

    /// `state.store.dir` を上書き
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// 揃わなければこの秒数で諦める
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

struct DemoHandler {
    fail_attempts: u32,
}

#[async_trait]
impl TaskHandler for DemoHandler {
    async fn handle(&self, ctx: &TaskContext) -> Result<(), TaskFailure> {
        let split = ctx.property("split").unwrap_or("0");
        if ctx.attempt() < self.fail_attempts {
            return Err(TaskFailure::failed(format!(
                "split {split}: intentional failure on attempt {}",
                ctx.attempt()
            )));
        }

        for _ in 0..10 {
            ctx.checkpoint()?;
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx.record_written(100, 4096);
        }
        info!(task_id = %ctx.task_id(), split, "split copied");
        Ok(())
    }
}

struct SummaryListener;

#[async_trait]
impl JobListener for SummaryListener {
    async fn on_job_completion(&self, job_state: &JobState) -> Result<(), ListenerError> {
        let counts = job_state.task_counts();
        info!(
            job_id = %job_state.job_id(),
            state = %job_state.state(),
            committed = counts.committed,
            failed = counts.failed,
            duration_ms = job_state.duration_ms().unwrap_or_default(),
            "job completed"
        );
        Ok(())
    }

    async fn on_job_cancellation(&self, job_state: &JobState) -> Result<(), ListenerError> {
        warn!(job_id = %job_state.job_id(), "job cancelled");
        Ok(())
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

async fn run(mut config: RuntimeConfig, args: RunArgs) -> anyhow::Result<JobState> {
    if let Some(max_retries) = args.max_retries {
        config.max_task_retries = max_retries;
    }
    if let Some(dir) = args.state_dir {
        config.state_store_dir = Some(dir);
    }

    let mut handlers = HandlerRegistry::new();
    handlers.register(
        DEMO_TASK_TYPE,
        Arc::new(DemoHandler {
            fail_attempts: args.fail_attempts,
        }),
    )?;

    let spec = (0..args.tasks).fold(JobSpec::new(&args.job_name), |spec, split| {
        spec.with_work_unit(WorkUnit::new(DEMO_TASK_TYPE).with_property("split", split.to_string()))
    });

    let launcher = Arc::new(
        LocalJobLauncher::builder(spec, Arc::new(handlers))
            .config(config)
            .build()?,
    );
    let listener: Arc<dyn JobListener> = Arc::new(SummaryListener);

    // 指定があれば別タスクから cancel する
    let canceller = args.cancel_after_ms.map(|ms| {
        let launcher = Arc::clone(&launcher);
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            if let Err(e) = launcher.cancel_job(Some(listener)).await {
                warn!(error = %e, "cancel failed");
            }
        })
    });

    let job_state = launcher.launch_job(Some(listener)).await?;
    if let Some(canceller) = canceller {
        if job_state.state() == WorkingState::Cancelled {
            // listener 呼び出しまで待つ
            canceller.await?;
        } else {
            canceller.abort();
        }
    }
    Ok(job_state)
}

async fn collect(config: RuntimeConfig, args: CollectArgs) -> anyhow::Result<JobState> {
    let dir = args
        .state_dir
        .or(config.state_store_dir.clone())
        .context("collect needs --state-dir or state_store_dir in the config")?;

    let job_id = JobId::new(&args.job_id);
    let collector = Arc::new(TaskStateCollectorService::new(
        JobState::new(job_id, &args.job_id).into_shared(),
        Arc::new(FsStateStore::new(dir)),
        Arc::new(EventBus::new()),
        config.collector_interval(),
    ));
    info!(job_id = %args.job_id, tasks = args.tasks, "collecting task states");

    let collected = tokio::time::timeout(
        Duration::from_secs(args.timeout_secs),
        collector.collect_all(args.tasks),
    )
    .await
    .with_context(|| format!("task states not complete after {}s", args.timeout_secs))??;
    Ok(collected)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let job_state = match cli.command {
        Command::Run(args) => run(config, args).await?,
        Command::Collect(args) => collect(config, args).await?,
    };

    println!("{}", serde_json::to_string_pretty(&job_state)?);
    Ok(())
}
