use service_core::observability::init_tracing;
use sso_service::{config::SsoConfig, Application};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SsoConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level, config.log_format);

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
