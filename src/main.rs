use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

mod catalog;
mod context;
mod error;
mod learning;
mod nlu;
mod realtime;
mod recommend;
mod server;
mod settings;
mod workflow;

use catalog::{StaticCatalog, ToolCatalog};
use context::{ContextAnalyzer, ContextStore};
use learning::{LearningStore, SqliteLearningStore};
use nlu::{HttpIntentClassifier, IntentClassifier, LexiconNlu};
use realtime::SessionService;
use recommend::RecommendationOrchestrator;
use settings::ServiceConfig;
use workflow::WorkflowAdvisor;

#[derive(Debug, Parser)]
#[command(name = "toolpilot")]
#[command(about = "Conversational tool recommendation service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Start {
        #[arg(long, default_value = "127.0.0.1:7272")]
        listen: String,
        /// SQLite url for the learning store; defaults to the user data dir.
        #[arg(long)]
        database_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start {
            listen,
            database_url,
        } => {
            let addr: SocketAddr = listen.parse()?;
            let config = ServiceConfig::default();
            config.validate()?;

            let metrics = PrometheusBuilder::new().install_recorder()?;

            let store = Arc::new(ContextStore::new(&config));
            let lexicon = Arc::new(LexiconNlu);
            let classifier: Arc<dyn IntentClassifier> = match HttpIntentClassifier::from_env() {
                Some(remote) => {
                    info!("using remote intent classifier");
                    Arc::new(remote)
                }
                None => lexicon.clone(),
            };
            let analyzer = Arc::new(ContextAnalyzer::new(store, lexicon, classifier, &config));

            let catalog: Arc<dyn ToolCatalog> = Arc::new(StaticCatalog::with_default_tools());
            let learning: Arc<dyn LearningStore> =
                Arc::new(SqliteLearningStore::initialize(database_url).await?);

            let orchestrator = Arc::new(RecommendationOrchestrator::new(
                Arc::clone(&analyzer),
                Arc::clone(&catalog),
                learning,
                &config,
            ));
            let advisor = Arc::new(WorkflowAdvisor::new(catalog, &config));
            let service = Arc::new(SessionService::new(config, analyzer, orchestrator, advisor));

            let maintenance = service.spawn_maintenance();
            let state = server::AppState::new(service, metrics);
            server::serve(addr, state).await?;
            maintenance.abort();
        }
    }
    Ok(())
}
