use std::sync::Arc;
use std::time::Duration;

use schedule_recommender::bridge::{ConversationBridge, PersonaRunner};
use schedule_recommender::config::{AppConfig, env_status};
use schedule_recommender::llm::create_provider;
use schedule_recommender::lookup::BigQueryStudentLookup;
use schedule_recommender::onboarding::{OnboardingCoordinator, VerificationGate, app_routes};
use schedule_recommender::retrieval::VertexRagRetriever;
use schedule_recommender::router::Router;
use schedule_recommender::session::{SessionStore, spawn_prune_task};

/// How often idle sessions are swept.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export GOOGLE_API_KEY=...  (or GOOGLE_GENAI_USE_VERTEXAI=1 with project and token)");
        std::process::exit(1);
    });

    let corpus_label = |c: &Option<String>| c.as_deref().unwrap_or("(not set)").to_string();
    eprintln!("🎓 Schedule Recommender v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({})", config.llm.model, config.llm.backend);
    eprintln!("   API: http://0.0.0.0:{}/api/sessions", config.port);
    eprintln!(
        "   Chat WS: ws://0.0.0.0:{}/api/sessions/{{user_id}}/{{session_id}}/ws",
        config.port
    );
    eprintln!("   CS corpus: {}", corpus_label(&config.corpora.cs));
    eprintln!("   ME corpus: {}", corpus_label(&config.corpora.me));
    eprintln!(
        "   Student table: {}",
        config.student_table.as_deref().unwrap_or("(not set)")
    );
    eprintln!(
        "   Session idle timeout: {} min\n",
        config.session_idle_timeout.as_secs() / 60
    );

    // ── Collaborators ───────────────────────────────────────────────────
    let llm = create_provider(&config)?;
    let retriever = Arc::new(VertexRagRetriever::new(&config.google));
    let lookup = Arc::new(BigQueryStudentLookup::new(&config));

    let runner = Arc::new(PersonaRunner::new(
        llm,
        retriever,
        config.corpora.clone(),
        config.retrieval_top_k,
    ));

    // ── Sessions + onboarding ───────────────────────────────────────────
    let store = SessionStore::new(runner.clone());
    let _prune_handle = spawn_prune_task(
        Arc::clone(&store),
        config.session_idle_timeout,
        PRUNE_INTERVAL,
    );

    let coordinator = Arc::new(OnboardingCoordinator::new(
        store,
        VerificationGate::new(lookup),
        Router::default_rules(),
        Arc::new(ConversationBridge::new(runner)),
    ));

    let app = app_routes(coordinator, env_status(|key| std::env::var(key).ok()));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, app = %config.app_name, "HTTP server started");
    axum::serve(listener, app).await?;

    Ok(())
}
