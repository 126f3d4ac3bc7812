use edgeimg::config::{CacheModule, ConfigDocument, CoreModule, StorageModule, TransformModule};
use edgeimg::{build_router, lifecycle::LifecycleManager};
use std::sync::Arc;
use std::time::Duration;

fn load_config() -> ConfigDocument {
    let mut core = CoreModule::default();
    core.secret = std::env::var("IMAGEKIT_SECRET").unwrap_or_else(|_| "local-dev-secret".into());
    core.environment = std::env::var("EDGEIMG_ENV").unwrap_or_else(|_| "development".into());

    let mut storage = StorageModule::default();
    storage.cache_dir = std::path::PathBuf::from(std::env::var("EDGEIMG_CACHE_DIR").unwrap_or_else(|_| "./cache".into()));
    storage.remote_base_url = std::env::var("EDGEIMG_REMOTE_BASE_URL").ok();
    storage.fallback_base_url = std::env::var("EDGEIMG_FALLBACK_BASE_URL").ok();

    ConfigDocument {
        meta: Default::default(),
        core,
        storage,
        transform: TransformModule::default(),
        cache: CacheModule::default(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgeimg=debug,tower_http=debug".into())
        )
        .init();

    tracing::info!("Starting edgeimg server");

    let doc = load_config();
    doc.validate()?;

    let derived = edgeimg::config::ConfigService::new(doc.clone()).derived().await;

    // No services registered yet beyond config load above; init_all/shutdown_all
    // are no-ops over an empty graph until storage/cache get lifecycle hooks.
    let lifecycle = LifecycleManager::new(Duration::from_secs(10));
    lifecycle.init_all().await?;

    let app = build_router(doc, Arc::clone(&derived))?;

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    lifecycle.shutdown_all().await;
    Ok(())
}
