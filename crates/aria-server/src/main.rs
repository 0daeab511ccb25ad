use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aria_contract::storage::EntityStores;
use aria_contract::tool::{ToolError, ToolRegistry, TypedTool};
use schemars::JsonSchema;
use serde::Deserialize;
use aria_runtime::run_handler::RunTaskHandler;
use aria_runtime::scheduler::{SchedulerConfig, TaskHandler, TaskScheduler};
use aria_server::http::{self, AppState};
use aria_server::service::{
    AssistantService, MessageService, RunService, SharedStores, ThreadService,
};
use aria_store_adapters::MemoryStore;

#[derive(Debug, Parser)]
#[command(name = "aria-server", about = "OpenAI-Assistants-compatible run engine")]
struct Args {
    #[arg(long, env = "ARIA_HTTP_ADDR", default_value = "127.0.0.1:8080")]
    http_addr: String,

    /// Postgres connection string; falls back to the in-memory store.
    #[arg(long, env = "ARIA_DATABASE_URL")]
    database_url: Option<String>,

    /// Custom OpenAI-compatible endpoint (e.g. a local gateway). When unset,
    /// providers are resolved from their usual environment keys.
    #[arg(long, env = "ARIA_LLM_ENDPOINT")]
    llm_endpoint: Option<String>,

    #[arg(long, env = "ARIA_LLM_API_KEY")]
    llm_api_key: Option<String>,

    #[arg(long, env = "ARIA_WORKERS", default_value_t = 4)]
    workers: usize,

    #[arg(long, env = "ARIA_QUEUE_CAPACITY", default_value_t = 64)]
    queue_capacity: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ServerTimeArgs {}

/// Built-in tool returning the server clock; handy for smoke-testing the
/// in-process tool path without wiring real integrations.
struct ServerTimeTool;

#[async_trait::async_trait]
impl TypedTool for ServerTimeTool {
    type Args = ServerTimeArgs;

    fn name(&self) -> &str {
        "server_time"
    }

    fn description(&self) -> &str {
        "Returns the server's current unix time in milliseconds"
    }

    async fn invoke(&self, _args: ServerTimeArgs) -> Result<String, ToolError> {
        Ok(aria_contract::now_millis().to_string())
    }
}

fn build_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(ServerTimeTool))
        .expect("builtin tool registration");
    registry
}

fn build_llm_client(endpoint: Option<String>, api_key: Option<String>) -> genai::Client {
    match endpoint {
        Some(endpoint) => {
            let api_key = api_key.unwrap_or_default();
            genai::Client::builder()
                .with_service_target_resolver_fn(move |mut target: genai::ServiceTarget| {
                    target.endpoint = genai::resolver::Endpoint::from_owned(&*endpoint);
                    target.auth = genai::resolver::AuthData::from_single(api_key.clone());
                    Ok(target)
                })
                .build()
        }
        None => genai::Client::default(),
    }
}

async fn build_stores(database_url: Option<&str>) -> SharedStores {
    match database_url {
        #[cfg(feature = "postgres")]
        Some(url) => {
            let pool = sqlx::PgPool::connect(url)
                .await
                .expect("failed to connect to postgres");
            let store = aria_store_adapters::PostgresStore::new(pool);
            store
                .ensure_tables()
                .await
                .expect("failed to prepare postgres tables");
            info!("using postgres entity store");
            Arc::new(store)
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => {
            eprintln!("--database-url requires the `postgres` feature");
            std::process::exit(2);
        }
        None => {
            info!("using in-memory entity store");
            Arc::new(MemoryStore::new())
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let stores: SharedStores = build_stores(args.database_url.as_deref()).await;
    let registry = Arc::new(build_registry());
    let llm_client = Arc::new(build_llm_client(args.llm_endpoint, args.llm_api_key));

    let run_handler: Arc<dyn TaskHandler> = Arc::new(RunTaskHandler::<dyn EntityStores>::new(
        stores.clone(),
        llm_client,
        registry.clone(),
    ));
    let scheduler = TaskScheduler::start(
        SchedulerConfig {
            workers: args.workers,
            queue_capacity: args.queue_capacity,
            ..SchedulerConfig::default()
        },
        vec![run_handler],
    );

    let threads = Arc::new(ThreadService::new(stores.clone()));
    let state = AppState {
        assistants: Arc::new(AssistantService::new(stores.clone())),
        messages: Arc::new(MessageService::new(stores.clone())),
        runs: Arc::new(RunService::new(
            stores.clone(),
            scheduler.clone(),
            threads.clone(),
        )),
        threads,
    };

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(&args.http_addr)
        .await
        .expect("failed to bind http listener");
    info!(addr = %args.http_addr, workers = args.workers, "aria-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .expect("http server crashed");

    scheduler.shutdown().await;
}
