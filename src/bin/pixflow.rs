use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use pixflow::{
    AppState, ComponentLibrary, Graph, GraphDocument, Network, Registry, Runtime, RuntimeConfig,
    RuntimeInfo, run_server,
};

#[derive(Parser, Debug)]
#[command(name = "pixflow", version)]
struct Cli {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 3569)]
    port: u16,

    /// Port we are available on for clients (defaults to --port).
    #[arg(short = 'e', long)]
    external_port: Option<u16>,

    /// Hostname used in preview URLs and registry records.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Default graph document to load and start.
    #[arg(short, long)]
    graph: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let external_port = cli.external_port.unwrap_or(cli.port);

    let mut runtime = Runtime::new(RuntimeConfig {
        hostname: cli.host.clone(),
        external_port,
    });

    if let Some(path) = &cli.graph {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("open graph '{}'", path.display()))?;
        let mut doc = GraphDocument::from_json(&text)
            .with_context(|| format!("parse graph '{}'", path.display()))?;
        if doc.id.is_empty() {
            doc.id = "default/main".to_owned();
        }
        let library = ComponentLibrary::new();
        let graph = Graph::from_document(&library, &doc)?;
        let network = Network::new(graph, runtime.library())?;
        runtime.set_default_network(network);
        eprintln!("loaded default graph from {}", path.display());
    }

    let registry = Registry::new(RuntimeInfo::from_env(&cli.host, external_port));
    match registry.register().await {
        Ok(true) => {
            registry.start_pinging();
        }
        Ok(false) => {
            tracing::info!("no PIXFLOW_USER_ID set, skipping registry registration");
        }
        Err(e) => {
            tracing::warn!(error = %e, "registry registration failed, continuing unregistered");
        }
    }

    eprintln!(
        "runtime running on port {}, external port {}",
        cli.port, external_port
    );
    let state = AppState {
        runtime: Arc::new(Mutex::new(runtime)),
    };
    run_server(state, cli.port).await
}
