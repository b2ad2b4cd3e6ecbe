//! Weather lookup tool backed by a plain-text weather service

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::dispatcher::{ToolDispatcher, ToolError, ToolHandler};
use super::schema::{ArgumentSchema, FieldType};
use crate::{Error, Result};

pub const WEATHER_TOOL: &str = "weather";

const DESCRIPTION: &str = "Get the weather in a location";

/// Condition and temperature, e.g. `Sunny +21°C`
const FORMAT_QUERY: &str = "format=%C+%t";

/// Looks up current conditions for a location
pub struct WeatherTool {
    client: Client,
    base_url: Url,
}

impl WeatherTool {
    /// Create a tool querying `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid weather url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("weather url cannot be a base: {base_url}")));
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Sightline-Gateway/0.1")
            .build()
            .map_err(Error::Http)?;

        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn schema() -> ArgumentSchema {
        ArgumentSchema::new().required(
            "location",
            FieldType::String,
            "The location to get the weather for",
        )
    }

    /// Register under [`WEATHER_TOOL`]
    ///
    /// # Errors
    ///
    /// Returns error if a tool with the same name is already registered
    pub fn register(self, dispatcher: &mut ToolDispatcher) -> Result<()> {
        dispatcher.register(WEATHER_TOOL, DESCRIPTION, Self::schema(), Arc::new(self))
    }

    fn url_for(&self, location: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(location);
        }
        url.set_query(Some(FORMAT_QUERY));
        url
    }

    /// Fetch the current weather for `location`
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Upstream` on a non-success status
    pub async fn lookup(&self, location: &str) -> std::result::Result<String, ToolError> {
        let url = self.url_for(location);
        tracing::debug!(%url, "fetching weather");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Upstream {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let weather = response.text().await?;
        Ok(format!(
            "The weather in {location} right now is {}.",
            weather.trim()
        ))
    }
}

#[async_trait]
impl ToolHandler for WeatherTool {
    async fn call(&self, arguments: Value) -> std::result::Result<String, ToolError> {
        let location = arguments["location"]
            .as_str()
            .ok_or_else(|| ToolError::Failed("location must be a string".to_string()))?;
        self.lookup(location).await
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::extract::{Path, RawQuery};
    use axum::http::StatusCode;
    use axum::routing::get;

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    #[test]
    fn builds_location_url() {
        let tool = WeatherTool::new("https://wttr.in", Duration::from_secs(1)).unwrap();
        assert_eq!(
            tool.url_for("New York").as_str(),
            "https://wttr.in/New%20York?format=%C+%t"
        );
        let nested = WeatherTool::new("http://localhost:9000/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            nested.url_for("Boston").as_str(),
            "http://localhost:9000/api/Boston?format=%C+%t"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(WeatherTool::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn formats_weather_sentence() {
        let base = serve(Router::new().route(
            "/{location}",
            get(|Path(location): Path<String>, RawQuery(query): RawQuery| async move {
                assert_eq!(query.as_deref(), Some("format=%C+%t"));
                format!("Sunny +21°C in {location}\n")
            }),
        ))
        .await;

        let tool = WeatherTool::new(&base, Duration::from_secs(2)).unwrap();
        let text = tool.lookup("Paris").await.unwrap();
        assert_eq!(text, "The weather in Paris right now is Sunny +21°C in Paris.");
    }

    #[tokio::test]
    async fn upstream_error_carries_status_and_body() {
        let base = serve(Router::new().route(
            "/{location}",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "try later") }),
        ))
        .await;

        let tool = WeatherTool::new(&base, Duration::from_secs(2)).unwrap();
        let err = tool.lookup("Boston").await.unwrap_err();
        match err {
            ToolError::Upstream { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "try later");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
