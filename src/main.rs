use musik::config::Config;
use musik::context::Context;
use musik::{service, LOG};

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(p) = dotenv::dotenv() {
        slog::info!(LOG, "loaded env file {:?}", p);
    }
    let config = Config::load()?;
    config.initialize()?;
    let ctx = Context::from_config(config).await?;
    service::start(ctx).await?;
    Ok(())
}
