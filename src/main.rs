use anyhow::{Context, Result};
use dealchat::cli::{Args, ChatConfig, ExecutionMode, render_footer, render_result};
use dealchat::classifier::KeywordClassifier;
use dealchat::config::{ConfigDiscovery, ProviderConfig};
use dealchat::env::DEFAULT_LOG_FILTER;
use dealchat::llm::{BackendSet, ChatMessage};
use dealchat::orchestrator::{ChatRequest, ChatResult, Orchestrator};
use dealchat::store::MemoryStore;
use dealchat::stream::StreamEvent;
use dealchat::tools::{Catalog, ToolRegistry};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Catalog looked up in the working directory when `--catalog` is absent.
const DEFAULT_CATALOG_FILE: &str = "catalog.json";

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so answers on stdout stay pipeable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    match mode {
        ExecutionMode::Chat(config) => run_chat(config).await,
        ExecutionMode::ShowConfig { config_override } => show_config(config_override.as_deref()),
        ExecutionMode::InitConfig => {
            let path = ConfigDiscovery::create_default_user_config()
                .context("Failed to write default configuration")?;
            println!("Default configuration written to {}", path.display());
            Ok(())
        }
    }
}

async fn run_chat(config: ChatConfig) -> Result<()> {
    let provider_config = Arc::new(
        ProviderConfig::load(config.config_override.as_deref())
            .context("Failed to load configuration")?,
    );
    info!(
        "Using backend {} (simple: {}, complex: {})",
        provider_config.active_backend,
        provider_config.models.simple,
        provider_config.models.complex
    );

    let orchestrator = build_orchestrator(provider_config, config.catalog.as_deref())?;

    let mut request = ChatRequest::new(config.message.clone(), config.identity.clone());
    if let Some(path) = &config.history {
        request = request.with_history(load_history(path)?);
    }
    for (key, value) in &config.context {
        request = request.with_context(key.clone(), value.clone());
    }

    let result = if config.stream {
        stream_chat(&orchestrator, request).await
    } else {
        orchestrator.chat(request).await
    };

    if config.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_result(&result));
        eprintln!("{}", render_footer(&result));
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn build_orchestrator(config: Arc<ProviderConfig>, catalog: Option<&Path>) -> Result<Orchestrator> {
    let backends =
        BackendSet::from_config(config.clone()).context("Failed to initialize LLM backend")?;

    let catalog = Arc::new(load_catalog(catalog)?);
    let classifier = classifier_for(&catalog);
    let tools = ToolRegistry::new(
        catalog,
        config.limits.max_tool_results,
        config.cache_ttls.tool(),
    );
    let store = Arc::new(MemoryStore::from_config(&config));

    Ok(Orchestrator::new(
        config,
        backends,
        store.clone(),
        store,
        Arc::new(classifier),
        Arc::new(tools),
    ))
}

fn load_catalog(path: Option<&Path>) -> Result<Catalog> {
    match path {
        Some(path) => Catalog::from_json_file(path)
            .with_context(|| format!("Failed to load catalog {}", path.display())),
        None if Path::new(DEFAULT_CATALOG_FILE).is_file() => {
            info!("Loading catalog from {}", DEFAULT_CATALOG_FILE);
            Catalog::from_json_file(DEFAULT_CATALOG_FILE)
                .with_context(|| format!("Failed to load catalog {}", DEFAULT_CATALOG_FILE))
        }
        None => {
            warn!("No catalog given; deal tools will return empty results");
            Ok(Catalog::default())
        }
    }
}

/// Classifier that also recognizes every store named in the catalog.
fn classifier_for(catalog: &Catalog) -> KeywordClassifier {
    let defaults = KeywordClassifier::default();
    let mut stores: Vec<String> = catalog
        .stores
        .iter()
        .map(|s| s.name.clone())
        .chain(catalog.deals.iter().map(|d| d.store.clone()))
        .chain(catalog.coupons.iter().map(|c| c.store.clone()))
        .collect();
    if stores.is_empty() {
        return defaults;
    }
    stores.sort();
    stores.dedup();
    KeywordClassifier::new(stores)
}

fn load_history(path: &Path) -> Result<Vec<ChatMessage>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("History {} is not a JSON array of messages", path.display()))
}

/// Run a streamed request, echoing answer text to stderr as it arrives.
async fn stream_chat(orchestrator: &Orchestrator, request: ChatRequest) -> ChatResult {
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);

    let printer = async move {
        let mut stderr = std::io::stderr();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Text { content } => {
                    let _ = write!(stderr, "{}", content);
                    let _ = stderr.flush();
                }
                StreamEvent::Error { kind, message, .. } => {
                    let _ = writeln!(stderr, "\n[{}] {}", kind, message);
                }
                StreamEvent::Done { .. } => {
                    let _ = writeln!(stderr);
                }
                StreamEvent::Thinking { .. }
                | StreamEvent::ToolCallDelta { .. }
                | StreamEvent::DealIds { .. } => {}
            }
        }
    };

    let (result, ()) = tokio::join!(orchestrator.chat_stream(request, tx), printer);
    result
}

fn show_config(config_override: Option<&Path>) -> Result<()> {
    ConfigDiscovery::show_discovery_info();
    println!();

    let config = ProviderConfig::load(config_override).context("Failed to load configuration")?;
    println!("Effective configuration (secrets redacted):");
    println!();
    print!("{}", config.redacted().to_toml_string()?);
    Ok(())
}
