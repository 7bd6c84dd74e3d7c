use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inventory_assistant::config::{AssistantConfig, AuditTarget};
use inventory_assistant::db::{
    init_pool, lazy_pool, AuditSink, JsonlAuditSink, PgAuditSink, PgQueryStore, TracingAuditSink,
};
use inventory_assistant::llm::LlmClient;
use inventory_assistant::AssistantFacade;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "assistant")]
#[command(about = "Natural-language business questions over the inventory database")]
struct Args {
    /// Override OPENAI_MODEL
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question and print the JSON response
    Ask {
        /// The question in natural language
        question: String,

        /// Role of the caller (admin, owner, supplier, employee, customer)
        #[arg(short, long, default_value = "admin")]
        role: String,

        /// Location the caller belongs to
        #[arg(short, long)]
        location: Option<i64>,
    },
    /// Probe the LLM service and print readiness
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = AssistantConfig::from_env()?;
    if let Some(model) = args.model {
        config.model = model;
    }

    if config.api_key.is_none() {
        warn!("OPENAI_API_KEY not set - the assistant will report itself unavailable");
    }
    let llm = LlmClient::new(
        config.api_key.clone().unwrap_or_default(),
        config.model.clone(),
        config.base_url.clone(),
    )
    .with_request_timeout(config.timeouts.translation.max(config.timeouts.composition))?;

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;

    match args.command {
        Command::Status => {
            // Status never runs a query, so the store may stay unconnected.
            let store = Arc::new(PgQueryStore::new(lazy_pool(&database_url, true)?, config.timeouts.execution));
            let assistant = AssistantFacade::new(Arc::new(llm), store, Arc::new(TracingAuditSink), &config);
            assistant.check_ready().await;
            println!("{}", serde_json::to_string_pretty(&assistant.status().await)?);
        }
        Command::Ask { question, role, location } => {
            let query_pool = init_pool(&database_url, true).await?;
            let store = Arc::new(PgQueryStore::new(query_pool, config.timeouts.execution));

            let audit: Arc<dyn AuditSink> = match &config.audit {
                AuditTarget::Log => Arc::new(TracingAuditSink),
                AuditTarget::File(path) => Arc::new(JsonlAuditSink::new(path.clone())),
                AuditTarget::Postgres => Arc::new(PgAuditSink::new(init_pool(&database_url, false).await?)),
            };

            let assistant = AssistantFacade::new(Arc::new(llm), store, audit, &config);
            if !assistant.initialize().await {
                warn!("LLM service not reachable at start-up");
            }

            let outcome = assistant.ask_with_trace(&question, &role, location).await;
            println!("{}", serde_json::to_string_pretty(&outcome.response)?);

            // The reinforcement exchange and its audit record finish before the runtime exits.
            if let Some(task) = outcome.reinforcement {
                let grace = config.timeouts.composition + config.timeouts.execution;
                match tokio::time::timeout(grace, task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Reinforcement task panicked: {}", e),
                    Err(_) => warn!("Reinforcement task still running after {:?}; audit record may be lost", grace),
                }
            }
            info!("Done");
        }
    }

    Ok(())
}
