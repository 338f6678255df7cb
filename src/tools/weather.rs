//! Weather tools: `get_weather` (past 7 days) and `get_forecast` (next 7).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mcp::handler::{
    get_optional_string_arg, get_string_arg, json_result, success_result, Arguments, ToolHandler,
};
use crate::mcp::protocol::{Tool, ToolResult};
use crate::mcp::registry::ToolRegistry;
use crate::service::{Period, WeatherService};

/// How a report is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Text,
}

impl Format {
    fn from_args(args: &Arguments) -> Result<Self> {
        match get_optional_string_arg(args, "format").as_deref() {
            None | Some("json") => Ok(Format::Json),
            Some("text") => Ok(Format::Text),
            Some(other) => Err(Error::InvalidToolArguments(format!(
                "Argument 'format' must be 'json' or 'text', got '{}'",
                other
            ))),
        }
    }

    /// A user-facing failure, rendered the same way a report would be.
    fn failure(self, message: &str) -> Result<ToolResult> {
        let mut result = match self {
            Format::Json => json_result(&json!({ "error": message }))?,
            Format::Text => success_result(format!("Error: {}", message)),
        };
        result.is_error = true;
        Ok(result)
    }
}

/// One tool per [`Period`].
pub struct WeatherTool {
    service: Arc<WeatherService>,
    period: Period,
}

impl WeatherTool {
    pub fn past_week(service: Arc<WeatherService>) -> Self {
        Self {
            service,
            period: Period::PastWeek,
        }
    }

    pub fn forecast(service: Arc<WeatherService>) -> Self {
        Self {
            service,
            period: Period::NextWeek,
        }
    }

    fn name(&self) -> &'static str {
        match self.period {
            Period::PastWeek => "get_weather",
            Period::NextWeek => "get_forecast",
        }
    }
}

#[async_trait]
impl ToolHandler for WeatherTool {
    fn definition(&self) -> Tool {
        let (description, noun) = match self.period {
            Period::PastWeek => (
                "Get historical weather data for the last 7 days for a specific city. Returns temperature (min/max), precipitation, and wind speed.",
                "weather",
            ),
            Period::NextWeek => (
                "Get weather forecast for the next 7 days for a specific city. Returns temperature (min/max), precipitation, and wind speed.",
                "forecast",
            ),
        };

        Tool {
            name: self.name().to_string(),
            description: description.to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "city": {
                        "type": "string",
                        "description": format!("Name of the city to get {} for (e.g., 'London', 'New York', 'Tokyo')", noun)
                    },
                    "format": {
                        "type": "string",
                        "enum": ["json", "text"],
                        "description": "Output format (default: json)"
                    }
                },
                "required": ["city"]
            }),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult> {
        let format = Format::from_args(&args)?;
        let city = match args.get("city") {
            None | Some(Value::Null) => String::new(),
            Some(_) => get_string_arg(&args, "city")?,
        };
        let city = city.trim();
        if city.is_empty() {
            return format.failure("City name is required");
        }

        let Some(report) = self.service.report(city, self.period).await? else {
            return format.failure(&format!("City '{}' not found", city));
        };

        match format {
            Format::Json => json_result(&report),
            Format::Text => Ok(success_result(report.to_text(self.period))),
        }
    }
}

/// Register `get_weather` and `get_forecast`.
pub fn register(registry: &mut ToolRegistry, service: Arc<WeatherService>) -> Result<()> {
    registry.register(WeatherTool::past_week(service.clone()))?;
    registry.register(WeatherTool::forecast(service))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::WeatherEndpoints;
    use axum::{routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::time::Duration;

    async fn service() -> Arc<WeatherService> {
        async fn search(
            axum::extract::Query(q): axum::extract::Query<HashMap<String, String>>,
        ) -> Json<Value> {
            if q.get("name").map(String::as_str) == Some("Tokyo") {
                Json(json!({"results": [{
                    "name": "Tokyo", "country": "Japan",
                    "latitude": 35.69, "longitude": 139.69, "timezone": "Asia/Tokyo"
                }]}))
            } else {
                Json(json!({}))
            }
        }
        async fn daily() -> Json<Value> {
            Json(json!({
                "timezone": "Asia/Tokyo",
                "daily": {
                    "time": ["2026-10-16"],
                    "temperature_2m_max": [21.0],
                    "temperature_2m_min": [15.5],
                    "precipitation_sum": [0.2],
                    "windspeed_10m_max": [9.4]
                }
            }))
        }

        let app = Router::new()
            .route("/v1/search", get(search))
            .route("/v1/archive", get(daily))
            .route("/v1/forecast", get(daily));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Arc::new(
            WeatherService::new(
                WeatherEndpoints::under(&format!("http://{}", addr)),
                Duration::from_secs(5),
            )
            .unwrap(),
        )
    }

    fn args(value: Value) -> Arguments {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_forecast_json() {
        let tool = WeatherTool::forecast(service().await);
        assert_eq!(tool.definition().name, "get_forecast");

        let result = tool.execute(args(json!({"city": " Tokyo "}))).await.unwrap();
        assert!(!result.is_error);
        let body: Value = serde_json::from_str(&result.text()).unwrap();
        assert_eq!(body["city"], json!("Tokyo"));
        assert_eq!(body["country"], json!("Japan"));
        assert_eq!(body["timezone"], json!("Asia/Tokyo"));
        assert_eq!(body["records"][0]["max_temp_c"], json!(21.0));
    }

    #[tokio::test]
    async fn test_weather_text() {
        let tool = WeatherTool::past_week(service().await);
        let result = tool
            .execute(args(json!({"city": "Tokyo", "format": "text"})))
            .await
            .unwrap();
        let text = result.text();
        assert!(text.starts_with("Weather Data (PAST 7 DAYS) for Tokyo (Japan)"));
        assert!(text.contains("Last 7 Days:"));
        assert!(text.contains("Precipitation: 0.2mm"));
    }

    #[tokio::test]
    async fn test_city_errors() {
        let tool = WeatherTool::past_week(service().await);

        let result = tool.execute(args(json!({"city": "   "}))).await.unwrap();
        assert!(result.is_error);
        let body: Value = serde_json::from_str(&result.text()).unwrap();
        assert_eq!(body, json!({"error": "City name is required"}));

        let result = tool
            .execute(args(json!({"city": "Atlantis", "format": "text"})))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.text(), "Error: City 'Atlantis' not found");

        let err = tool.execute(args(json!({"city": 42}))).await.unwrap_err();
        assert!(matches!(err, Error::InvalidToolArguments(ref m) if m.contains("city")));

        let err = tool
            .execute(args(json!({"city": "Tokyo", "format": "xml"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidToolArguments(_)));
    }
}
