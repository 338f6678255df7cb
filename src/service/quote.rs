//! Approximate stock quotes scraped from a finance quote page.

use regex::Regex;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_QUOTE_URL: &str = "https://www.google.com/finance";

/// A scraped price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub currency: &'static str,
    pub source: &'static str,
}

/// Fetches `{base}/quote/{SYMBOL}:{EXCHANGE}` and takes the first dollar
/// amount on the page.
#[derive(Debug, Clone)]
pub struct QuoteService {
    client: Client,
    base_url: String,
    exchange: String,
    price_pattern: Regex,
}

impl QuoteService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        let price_pattern = Regex::new(r"\$([0-9,]+\.\d+)")
            .map_err(|e| Error::Internal(format!("bad price pattern: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            exchange: "NASDAQ".to_string(),
            price_pattern,
        })
    }

    /// Quote `symbol`. `None` when the page carries no recognisable price.
    ///
    /// The page's HTTP status is not checked; error pages simply yield no
    /// price.
    pub async fn price(&self, symbol: &str) -> Result<Option<Quote>> {
        let symbol = symbol.trim().to_uppercase();
        let url = format!("{}/quote/{}:{}", self.base_url, symbol, self.exchange);
        debug!("Fetching quote page {}", url);

        let page = self
            .client
            .get(&url)
            .header(USER_AGENT, "Mozilla/5.0")
            .send()
            .await?
            .text()
            .await?;

        Ok(self.extract_price(&page).map(|price| Quote {
            symbol,
            price,
            currency: "USD",
            source: "Google Finance",
        }))
    }

    /// First `$1,234.56`-style amount in `page`.
    pub fn extract_price(&self, page: &str) -> Option<f64> {
        let captured = self.price_pattern.captures(page)?.get(1)?;
        captured.as_str().replace(',', "").parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::HeaderMap, routing::get, Router};

    fn service(base: &str) -> QuoteService {
        QuoteService::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_extract_price() {
        let s = service("http://unused");
        assert_eq!(
            s.extract_price(r#"<div class="YMlKec fxKbKc">$1,234.56</div> $9.99"#),
            Some(1234.56)
        );
        assert_eq!(s.extract_price("<div>$187.4</div>"), Some(187.4));
        assert_eq!(s.extract_price("price: 42 dollars, $17"), None);
    }

    #[tokio::test]
    async fn test_price_from_page() {
        async fn quote(Path(ticker): Path<String>, headers: HeaderMap) -> String {
            assert_eq!(headers.get("user-agent").unwrap(), "Mozilla/5.0");
            match ticker.as_str() {
                "AAPL:NASDAQ" => "<html><span>$227.48</span></html>".to_string(),
                _ => "<html>We couldn't find that</html>".to_string(),
            }
        }

        let app = Router::new().route("/quote/{ticker}", get(quote));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let s = service(&format!("http://{}/", addr));
        let quote = s.price(" aapl ").await.unwrap().unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, 227.48);
        assert_eq!(quote.currency, "USD");

        assert!(s.price("ZZZZ").await.unwrap().is_none());
    }
}
