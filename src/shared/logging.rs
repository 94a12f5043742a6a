use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. Safe to call more than once.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "classroom_sync=debug,info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
