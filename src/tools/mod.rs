//! MCP tool implementations.
//!
//! Tools are grouped by the server that exposes them:
//!
//! - `weather` - past week and forecast lookups (2 tools)
//! - `stocks` - cash ledger, portfolio and quotes (7 tools)
//! - `documents` - chunk search (1 tool)

pub mod documents;
pub mod stocks;
pub mod weather;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, ServerKind};
use crate::error::Result;
use crate::mcp::registry::ToolRegistry;
use crate::service::{Ledger, LocalIndex, QuoteService, WeatherEndpoints, WeatherService};

/// Build the services for `config.server` and register its tools.
pub async fn build_registry(config: &Config) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    let timeout = Duration::from_secs(config.http_timeout_secs);

    match config.server {
        ServerKind::Weather => {
            let endpoints = match &config.weather_base_url {
                Some(base) => WeatherEndpoints::under(base),
                None => WeatherEndpoints::default(),
            };
            let service = Arc::new(WeatherService::new(endpoints, timeout)?);
            weather::register(&mut registry, service)?;
        }
        ServerKind::Stocks => {
            let ledger = Arc::new(Ledger::in_dir(&config.data_dir));
            ledger.init(config.initial_balance).await?;
            let quotes = Arc::new(QuoteService::new(&config.quote_base_url, timeout)?);
            stocks::register(&mut registry, ledger, quotes)?;
        }
        ServerKind::Documents => {
            let index = LocalIndex::open(&config.index_path).await?;
            if let Some(dir) = &config.ingest_dir {
                index.ingest_dir(dir).await?;
            }
            documents::register(&mut registry, Arc::new(index), config.top_k)?;
        }
    }

    info!("Registered {} tools for {}", registry.len(), config.server);
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use crate::config::Args;
    use tempfile::TempDir;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["mcp-toolbox"];
        argv.extend_from_slice(args);
        Config::from(Args::parse_from(argv))
    }

    #[tokio::test]
    async fn test_each_server_registers_its_tools() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().to_str().unwrap();

        let weather = build_registry(&config(&["--server", "weather"])).await.unwrap();
        assert!(weather.contains("get_weather"));
        assert!(weather.contains("get_forecast"));
        assert_eq!(weather.len(), 2);

        let stocks = build_registry(&config(&["--server", "stocks", "--data-dir", data]))
            .await
            .unwrap();
        assert_eq!(stocks.len(), 7);
        assert!(dir.path().join("account_balance.csv").exists());

        let index = dir.path().join("index.json");
        let docs = build_registry(&config(&[
            "--server",
            "documents",
            "--index-path",
            index.to_str().unwrap(),
        ]))
        .await
        .unwrap();
        assert_eq!(docs.list()[0].name, "document_search");
    }
}
