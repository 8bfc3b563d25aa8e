use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use wheelhand::api::ClientRegistry;
use wheelhand::config::Settings;
use wheelhand::launcher::spawn_accounts;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = Arc::new(Settings::from_env()?);

    // Initialize tracing; the guard keeps the file writer flushing until exit
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_layer, _log_guard) = match &settings.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "wheelhand.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("🎡 wheelhand v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Sessions: {}", settings.sessions_dir.display());
    eprintln!("   API: {}", settings.api_base_url);
    eprintln!(
        "   Proxies: {}",
        if settings.use_proxy {
            settings.proxies_file.display().to_string()
        } else {
            "disabled".to_string()
        }
    );

    let registry = Arc::new(ClientRegistry::new());
    let mut accounts = spawn_accounts(Arc::clone(&settings), Arc::clone(&registry))?;

    if accounts.is_empty() {
        eprintln!(
            "No sessions found. Put one <name>.url launch URL file per account in {}",
            settings.sessions_dir.display()
        );
        return Ok(());
    }

    let interrupted = tokio::select! {
        _ = async { while accounts.join_next().await.is_some() {} } => false,
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for shutdown signal: {e}");
            }
            true
        }
    };

    if interrupted {
        let closed = registry.close_all();
        tracing::info!(closed, "Shutdown requested");
        accounts.shutdown().await;
    } else {
        tracing::info!("All accounts stopped");
    }

    Ok(())
}
