use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowrun_core::config::AppConfig;
use flowrun_core::credential::Credential;
use flowrun_core::flow::Flow;
use flowrun_core::traits::{CredentialStore, LlmClient};
use flowrun_core::types::Variables;
use flowrun_core::validate::validate_flow;

use flowrun_engine::{FlowEngine, RunOptions};
use flowrun_store::{MemoryCredentialStore, SqliteConnector, SqliteStore};

#[derive(Parser)]
#[command(name = "flowrun", version, about = "Run low-code automation flows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowrun.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow once and print the result as JSON
    Run {
        /// Flow JSON file, or the id of a flow in the store
        flow: String,
        /// Initial variables as a JSON object
        #[arg(short, long)]
        input: Option<String>,
        /// JSON array of credentials; defaults to the store
        #[arg(long)]
        credentials: Option<PathBuf>,
        /// Start at this node instead of the trigger
        #[arg(long)]
        entry: Option<String>,
    },
    /// Check a flow file for structural and configuration errors
    Validate {
        flow: PathBuf,
    },
    /// Validate a flow file and save it to the store
    Save {
        flow: PathBuf,
        /// Owning agent, if the file doesn't name one
        #[arg(long)]
        agent: Option<String>,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowrun=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "flowrun", &mut std::io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)?;
    if !cli.config.exists() {
        info!(path = %cli.config.display(), "No config file, using defaults");
    }

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { flow } => {
            let flow = read_flow(&flow)?;
            let report = validate_flow(&flow, &config.engine.trigger_prefix);
            for issue in &report.warnings {
                println!("warning: {}", issue);
            }
            for issue in &report.errors {
                println!("error: {}", issue);
            }
            if !report.is_valid() {
                anyhow::bail!("{} error(s) in {}", report.errors.len(), flow.name);
            }
            println!("{}: ok ({} nodes, {} edges)", flow.name, flow.nodes.len(), flow.edges.len());
        }
        Commands::Save { flow, agent } => {
            let mut flow = read_flow(&flow)?;
            if let Some(agent) = agent {
                flow.agent_id = agent;
            }
            let store = open_store(&config)?;
            let saved = store.save_flow(flow)?;
            println!("{}", saved.id);
        }
        Commands::Run {
            flow,
            input,
            credentials,
            entry,
        } => {
            run_flow(config, &flow, input.as_deref(), credentials.as_deref(), entry).await?;
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

async fn run_flow(
    config: AppConfig,
    flow_ref: &str,
    input: Option<&str>,
    credentials: Option<&Path>,
    entry: Option<String>,
) -> anyhow::Result<()> {
    let input: Variables = match input {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("--input must be a JSON object: {}", e))?,
        None => Variables::new(),
    };

    let path = Path::new(flow_ref);
    let (flow, store) = if path.exists() {
        (read_flow(path)?, None)
    } else {
        let store = Arc::new(open_store(&config)?);
        (store.get_flow(flow_ref)?, Some(store))
    };

    let credential_store: Arc<dyn CredentialStore> = match (credentials, store) {
        (Some(file), _) => {
            let list: Vec<Credential> = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            info!(count = list.len(), "Loaded credentials from file");
            Arc::new(list.into_iter().collect::<MemoryCredentialStore>())
        }
        (None, Some(store)) => store,
        (None, None) => Arc::new(open_store(&config)?),
    };

    let llm: Arc<dyn LlmClient> = Arc::from(flowrun_llm::create_client(&config.llm)?);
    let engine = FlowEngine::new(config, credential_store, llm, Arc::new(SqliteConnector::new()));

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    let mut options = RunOptions::default();
    if let Some(entry) = entry {
        options = options.entry(entry);
    }
    let result = engine.execute_with(&flow, input, options).await?;

    for failure in &result.failures {
        warn!(node_id = %failure.node_id, error = %failure.error, "Branch abandoned");
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn read_flow(path: &Path) -> anyhow::Result<Flow> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    let flow = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("{} is not a valid flow: {}", path.display(), e))?;
    Ok(flow)
}

fn open_store(config: &AppConfig) -> anyhow::Result<SqliteStore> {
    let path = config.store_path();
    let store = SqliteStore::open(&path)?.with_trigger_prefix(config.engine.trigger_prefix.clone());
    Ok(store)
}
