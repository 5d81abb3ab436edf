use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use daybook_common::{AgentConfig, Config};
use daybook_curator::CuratorAgent;
use daybook_pipeline::Analyzer;
use daybook_store::PgStore;

#[derive(Parser)]
#[command(name = "curator")]
#[command(about = "Verify and clean up daily event records")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify every record, then run cleanup passes over the issues found
    Run(RunArgs),

    /// Continue an interrupted session where it stopped
    Resume { session_id: Uuid },

    /// Fact-check every record and queue issues, no cleanup passes
    VerifyOnly {
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
    },

    /// Dry run over a few records; nothing is written
    Test {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Maximum runtime in hours
    #[arg(long, default_value_t = 4.0)]
    hours: f64,

    /// Maximum spend in USD
    #[arg(long, default_value_t = 35.0)]
    budget: f64,

    #[arg(long, default_value_t = 10)]
    passes: u32,

    /// Concurrent workers per batch
    #[arg(long, default_value_t = 5)]
    parallel: usize,

    #[arg(long, default_value_t = 100)]
    batch_size: usize,

    /// Record planned changes instead of writing them
    #[arg(long)]
    test: bool,

    #[arg(long, default_value_t = 50)]
    test_limit: usize,

    /// Skip the verification sweep and go straight to cleanup
    #[arg(long)]
    no_verification: bool,

    /// Apply decisions at 70% confidence instead of 90%
    #[arg(long)]
    auto_approve: bool,
}

impl RunArgs {
    fn into_config(self) -> AgentConfig {
        let defaults = AgentConfig::default();
        AgentConfig {
            max_runtime_hours: self.hours,
            max_budget: self.budget,
            max_passes: self.passes,
            parallel_workers: self.parallel,
            batch_size: self.batch_size,
            test_mode: self.test,
            test_limit: self.test_limit,
            auto_approve_threshold: if self.auto_approve {
                AgentConfig::AUTO_APPROVE_THRESHOLD
            } else {
                defaults.auto_approve_threshold
            },
            skip_verification: self.no_verification,
            ..defaults
        }
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("daybook=info".parse()?);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    info!("Daybook curator starting...");

    // Load config
    let config = Config::from_env()?;
    config.log_redacted();

    // Connect and migrate (idempotent)
    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    store.migrate().await?;

    let analyzer = Analyzer::from_config(&config, store.clone())?.with_holder_prefix("curator");
    let agent = Arc::new(CuratorAgent::new(Arc::new(analyzer), store));

    // Ctrl-C stops after in-flight work; the session stays resumable
    {
        let agent = agent.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after in-flight work");
                agent.cancel();
            }
        });
    }

    let session = match cli.command {
        Commands::Run(args) => agent.run(args.into_config()).await?,
        Commands::Resume { session_id } => agent.resume(session_id).await?,
        Commands::VerifyOnly { batch_size } => {
            agent
                .run(AgentConfig {
                    max_passes: 0,
                    batch_size,
                    ..Default::default()
                })
                .await?
        }
        Commands::Test { limit } => {
            agent
                .run(AgentConfig {
                    test_mode: true,
                    test_limit: limit,
                    ..Default::default()
                })
                .await?
        }
    };

    if session.config.test_mode {
        println!("{}", serde_json::to_string_pretty(&session.planned)?);
    } else if let Some(reason) = session.halted {
        println!(
            "Session {} stopped: {reason}. Continue with: curator resume {}",
            session.id, session.id
        );
    }

    info!("Curator complete. {}", session.counters);
    Ok(())
}
