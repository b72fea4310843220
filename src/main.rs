use finance_backend::config::Config;
use finance_backend::inference::InferenceClient;
use finance_backend::jobs::JobBus;
use finance_backend::routes::{self, AppState};
use finance_backend::schema;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    if std::env::var("ENV").ok().as_deref() != Some("prod") {
        dotenvy::dotenv().ok();
    }

    let config = Config::from_env();
    let pool = schema::connect(&config.database_url).await?;
    schema::migrate(&pool).await?;
    schema::seed_reserved_rows(&pool).await?;

    let jobs = JobBus::default();
    {
        // Expired job backlogs are reclaimed in the background.
        let jobs = jobs.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tick.tick().await;
                jobs.sweep();
            }
        });
    }

    let state = AppState {
        pool,
        jobs,
        inference: InferenceClient::from_key(config.gcp_key.clone()),
    };
    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
