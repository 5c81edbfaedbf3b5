use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;

use civic_moderation::api::moderation_routes;
use civic_moderation::config::{ModerationConfig, ServerConfig, StageConfig};
use civic_moderation::delivery::HttpDeliveryClient;
use civic_moderation::error::{ConfigError, Result};
use civic_moderation::llm::{LlmBackend, LlmConfig, LlmProvider, create_provider};
use civic_moderation::moderation::{ModerationPipeline, StageClassifiers};
use civic_moderation::store::{InMemoryTemplateStore, LibSqlAuditLog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ModerationConfig::from_env().context("Invalid moderation configuration")?;
    let server = ServerConfig::from_env().context("Invalid server configuration")?;

    eprintln!("Civic Moderation v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Safety: {} ({})",
        config.safety.model,
        config.safety.backend.as_str()
    );
    eprintln!(
        "   Contextual: {} ({})",
        config.contextual.model,
        config.contextual.backend.as_str()
    );
    eprintln!(
        "   Credibility: {} ({})",
        config.credibility.model,
        config.credibility.backend.as_str()
    );
    eprintln!("   Legislative route: {}", config.legislative_route_id);
    eprintln!("   Delivery: {}", config.delivery.base_url);
    eprintln!("   Database: {}", server.db_path);
    eprintln!("   API: http://0.0.0.0:{}/api/moderation", server.port);

    let pipeline = build_pipeline(config, &server).await?;
    let app = moderation_routes(Arc::new(pipeline));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", server.port))
        .await
        .with_context(|| format!("Failed to bind port {}", server.port))?;
    tracing::info!(port = server.port, "Moderation server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

async fn build_pipeline(config: ModerationConfig, server: &ServerConfig) -> Result<ModerationPipeline> {
    let classifiers = StageClassifiers {
        safety: stage_provider(&config.safety)?,
        contextual: stage_provider(&config.contextual)?,
        credibility: stage_provider(&config.credibility)?,
    };

    let templates = match &server.templates_path {
        Some(path) => InMemoryTemplateStore::from_json_file(Path::new(path)).await?,
        None => {
            tracing::warn!("MODERATION_TEMPLATES_PATH not set; template store is empty");
            InMemoryTemplateStore::new()
        }
    };

    let audit = LibSqlAuditLog::new_local(Path::new(&server.db_path)).await?;
    let delivery = HttpDeliveryClient::new(&config.delivery);

    Ok(
        ModerationPipeline::new(classifiers, Arc::new(delivery), Arc::new(templates), config)
            .with_audit(Arc::new(audit)),
    )
}

fn stage_provider(stage: &StageConfig) -> Result<Arc<dyn LlmProvider>> {
    let key_var = match stage.backend {
        LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
        LlmBackend::OpenAi => "OPENAI_API_KEY",
    };
    let api_key = std::env::var(key_var)
        .map_err(|_| ConfigError::MissingEnvVar(key_var.to_string()))?;

    Ok(create_provider(&LlmConfig {
        backend: stage.backend,
        api_key: SecretString::from(api_key),
        model: stage.model.clone(),
    })?)
}
