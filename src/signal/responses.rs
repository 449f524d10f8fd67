//! Responses-API client for the signal source.

use super::extract::{extract_text, extract_trailing_json};
use super::SignalSource;
use crate::config::SignalConfig;
use crate::feed::{Candle, CandleUpdate};
use crate::trading::StatusPayload;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputMessage<'a>>,
    store: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<&'a str>,
}

/// Stateful conversation with the model, chained by `previous_response_id`.
pub struct ResponsesClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    store_messages: bool,
    instructions: String,
    previous_response_id: Option<String>,
}

impl ResponsesClient {
    pub fn new(config: &SignalConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            endpoint: format!("{}/responses", normalize_base_url(&config.base_url)),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            store_messages: config.store_messages,
            instructions: config.instructions.trim().to_string(),
            previous_response_id: None,
        })
    }

    pub fn previous_response_id(&self) -> Option<&str> {
        self.previous_response_id.as_deref()
    }

    /// Send one user message (plus the system message when asked) and decode the reply.
    #[instrument(skip(self, payload))]
    async fn dispatch(&mut self, payload: &Value, include_system: bool) -> Result<Value> {
        let text = payload.to_string();

        let mut input = Vec::with_capacity(2);
        if include_system && !self.instructions.is_empty() {
            input.push(InputMessage {
                role: "system",
                content: &self.instructions,
            });
        }
        input.push(InputMessage {
            role: "user",
            content: &text,
        });

        let request = ResponsesRequest {
            model: &self.model,
            input,
            store: self.store_messages,
            previous_response_id: self.previous_response_id.as_deref(),
        };
        debug!(bytes = text.len(), "Sending request to signal source");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send signal request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read signal response")?;

        if !status.is_success() {
            error!(%status, %body, "Signal request failed");
            bail!("Signal request failed: HTTP {} - {}", status, body);
        }

        let body: Value = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse signal response: {}", truncate(&body)))?;

        if let Some(id) = body.get("id").and_then(Value::as_str) {
            self.previous_response_id = Some(id.to_string());
        }
        info!(response_id = ?self.previous_response_id, "Signal response received");

        let content = extract_text(&body)
            .with_context(|| format!("Signal response missing text: {}", truncate(&body.to_string())))?;
        debug!(%content, "Signal raw text");

        extract_trailing_json(&content)
            .ok_or_else(|| anyhow!("Signal response was not valid JSON: {}", truncate(&content)))
    }
}

#[async_trait]
impl SignalSource for ResponsesClient {
    async fn send_initial_snapshot(
        &mut self,
        symbol: &str,
        candles_5m: &[Candle],
        candles_15m: &[Candle],
    ) -> Result<Value> {
        if self.previous_response_id.is_some() {
            bail!("Initial snapshot already sent for this session");
        }

        let payload = json!({
            "phase": "initial_snapshot",
            "symbol": symbol,
            "snapshot": {
                "interval_5m": candles_5m,
                "interval_15m": candles_15m,
            },
        });
        info!(
            %symbol,
            candles_5m = candles_5m.len(),
            candles_15m = candles_15m.len(),
            "Sending initial snapshot"
        );
        self.dispatch(&payload, true).await
    }

    async fn request_signal(
        &mut self,
        symbol: &str,
        update: &CandleUpdate,
        status: &StatusPayload,
    ) -> Result<Value> {
        let payload = json!({
            "nextCandles": update,
            "activeTradeStatus": status.active_trade_status,
            "activeLimitOrderStatus": status.active_limit_order_status,
        });
        debug!(%symbol, has_15m = update.candles_15m.is_some(), "Requesting signal");
        self.dispatch(&payload, false).await
    }
}

fn normalize_base_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/v1") {
        base.to_string()
    } else {
        format!("{}/v1", base)
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(1500) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> SignalConfig {
        SignalConfig {
            api_key: "sk-test".to_string(),
            base_url: server.uri(),
            instructions: "You are a trader.".to_string(),
            ..SignalConfig::default()
        }
    }

    fn reply(id: &str, text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "id": id,
            "output": [{"type": "message", "content": [{"type": "output_text", "text": text}]}]
        }))
    }

    fn candle() -> Candle {
        Candle {
            open_time: 0,
            open: dec!(68000),
            high: dec!(68100),
            low: dec!(67900),
            close: dec!(68050),
            volume: dec!(1.5),
            close_time: 299_999,
        }
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://api.x.ai/v1/"), "https://api.x.ai/v1");
        assert_eq!(normalize_base_url("http://localhost:8080"), "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn test_initial_snapshot_sends_system_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "grok-4",
                "store": true,
                "input": [{"role": "system", "content": "You are a trader."}]
            })))
            .respond_with(reply("resp_1", "Waiting. {\"type\": \"wait\"}"))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = ResponsesClient::new(&config_for(&server)).unwrap();
        let signal = client
            .send_initial_snapshot("BTCUSDC", &[candle()], &[candle()])
            .await
            .unwrap();

        assert_eq!(signal, json!({"type": "wait"}));
        assert_eq!(client.previous_response_id(), Some("resp_1"));
    }

    #[tokio::test]
    async fn test_snapshot_only_once_per_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply("resp_1", "{\"type\": \"hold\"}"))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = ResponsesClient::new(&config_for(&server)).unwrap();
        client.send_initial_snapshot("BTCUSDC", &[], &[]).await.unwrap();

        let err = client
            .send_initial_snapshot("BTCUSDC", &[], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already sent"));
    }

    #[tokio::test]
    async fn test_request_chains_previous_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"previous_response_id": "resp_1"})))
            .respond_with(reply("resp_2", "{\"type\": \"exit\"}"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(reply("resp_1", "{\"type\": \"wait\"}"))
            .mount(&server)
            .await;

        let mut client = ResponsesClient::new(&config_for(&server)).unwrap();
        client.send_initial_snapshot("BTCUSDC", &[], &[]).await.unwrap();

        let update = CandleUpdate {
            candles_5m: vec![candle()],
            candles_15m: None,
        };
        let signal = client
            .request_signal("BTCUSDC", &update, &StatusPayload::default())
            .await
            .unwrap();

        assert_eq!(signal["type"], "exit");
        assert_eq!(client.previous_response_id(), Some("resp_2"));

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(body["input"].as_array().map(Vec::len), Some(1));
        let message: Value = serde_json::from_str(body["input"][0]["content"].as_str().unwrap()).unwrap();
        assert_eq!(message["nextCandles"]["5m"][0]["close"], json!(68050.0));
        assert!(message["nextCandles"].get("15m").is_none());
        assert_eq!(message["activeTradeStatus"]["side"], Value::Null);
        assert_eq!(message["activeLimitOrderStatus"]["price"], Value::Null);
    }

    #[tokio::test]
    async fn test_http_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let mut client = ResponsesClient::new(&config_for(&server)).unwrap();
        let err = client
            .request_signal("BTCUSDC", &CandleUpdate::default(), &StatusPayload::default())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("429"));
        assert_eq!(client.previous_response_id(), None);
    }

    #[tokio::test]
    async fn test_reply_without_json_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply("resp_1", "I am not sure yet."))
            .mount(&server)
            .await;

        let mut client = ResponsesClient::new(&config_for(&server)).unwrap();
        let err = client
            .request_signal("BTCUSDC", &CandleUpdate::default(), &StatusPayload::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
