use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use websheet_console::config::Config;
use websheet_console::run_console;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "websheet=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    run_console(config).await
}
