use std::sync::Arc;

use anyhow::{Context, bail};

use paybridge_api::app::{self, services};
use paybridge_api::config::{HrGatewayConfig, PayrollGatewayConfig};
use paybridge_observability::ObservabilityConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    paybridge_observability::init(&ObservabilityConfig::from_env());

    let service = std::env::var("PAYBRIDGE_SERVICE").unwrap_or_else(|_| "payroll".to_string());

    let (bind_addr, router) = match service.as_str() {
        "hr" => {
            let config = HrGatewayConfig::from_env()?;
            let services = Arc::new(services::HrServices::from_config(&config)?);
            (config.bind_addr, app::build_hr_app(services))
        }
        "payroll" => {
            let config = PayrollGatewayConfig::from_env()?;
            let services = Arc::new(services::PayrollServices::from_config(&config).await?);
            (config.bind_addr, app::build_payroll_app(services))
        }
        other => bail!("PAYBRIDGE_SERVICE must be `hr` or `payroll`, got {other:?}"),
    };

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(service = %service, "listening on {}", listener.local_addr()?);

    axum::serve(listener, router).await?;
    Ok(())
}
