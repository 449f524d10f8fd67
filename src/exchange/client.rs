//! Binance USD-M futures REST API client.

use crate::config::BinanceConfig;
use crate::exchange::traits::FuturesExchange;
use crate::exchange::types::*;
use crate::utils::decimal::to_wire;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, error, instrument};

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Binance error code returned when the requested margin type is already active.
const NO_NEED_TO_CHANGE_MARGIN_TYPE: i64 = -4046;

/// Maximum rows Binance returns from `/fapi/v1/klines`.
pub const MAX_KLINE_LIMIT: u16 = 1500;

/// Binance futures API client.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    exchange_info_cache: RwLock<Option<FuturesExchangeInfo>>,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &BinanceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = match (&config.rest_url, config.testnet) {
            (_, true) => FUTURES_TESTNET_URL.to_string(),
            (Some(url), false) => url.trim_end_matches('/').to_string(),
            (None, false) => FUTURES_BASE_URL.to_string(),
        };

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url,
            exchange_info_cache: RwLock::new(None),
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    fn encode_query(params: &[(String, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Send an unauthenticated GET request.
    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<T> {
        let query = Self::encode_query(&params);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to send GET {}", path))?;

        Self::parse_response(Method::GET, path, &query, response).await
    }

    /// Send a signed request. The signature is never included in error output.
    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<T> {
        params.push(("timestamp".to_string(), Self::timestamp().to_string()));
        let query = Self::encode_query(&params);
        let signature = self.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .http
            .request(method.clone(), &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to send {} {}", method, path))?;

        Self::parse_response(method, path, &query, response).await
    }

    async fn parse_response<T: DeserializeOwned>(
        method: Method,
        path: &str,
        query: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read {} {} response body", method, path))?;

        if !status.is_success() {
            error!(
                %method,
                %path,
                status = status.as_u16(),
                %body,
                params = %query,
                "Binance request failed"
            );
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(api) => anyhow!(
                    "Binance {} {} failed with status {}: code {} {}",
                    method,
                    path,
                    status.as_u16(),
                    api.code,
                    api.msg
                ),
                Err(_) => anyhow!(
                    "Binance {} {} failed with status {}: {}",
                    method,
                    path,
                    status.as_u16(),
                    body
                ),
            });
        }

        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse {} {} response", method, path))
    }

    // ==================== Market Data (Public) ====================

    /// Fetch raw kline rows for a symbol and interval (e.g. "5m").
    #[instrument(skip(self))]
    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Vec<serde_json::Value>>> {
        let limit = limit.clamp(1, MAX_KLINE_LIMIT);
        self.public_get(
            "/fapi/v1/klines",
            vec![
                ("symbol".to_string(), symbol.to_string()),
                ("interval".to_string(), interval.to_string()),
                ("limit".to_string(), limit.to_string()),
            ],
        )
        .await
        .context("Failed to fetch klines")
    }
}

#[async_trait]
impl FuturesExchange for BinanceClient {
    #[instrument(skip(self))]
    async fn exchange_info(&self) -> Result<FuturesExchangeInfo> {
        if let Some(info) = self.exchange_info_cache.read().await.as_ref() {
            return Ok(info.clone());
        }

        let info: FuturesExchangeInfo = self
            .public_get("/fapi/v1/exchangeInfo", Vec::new())
            .await
            .context("Failed to fetch exchange info")?;

        *self.exchange_info_cache.write().await = Some(info.clone());
        Ok(info)
    }

    // ==================== Account (Authenticated) ====================

    #[instrument(skip(self))]
    async fn account_information(&self) -> Result<AccountInformation> {
        self.signed_request(Method::GET, "/fapi/v2/account", Vec::new())
            .await
            .context("Failed to fetch account information")
    }

    #[instrument(skip(self))]
    async fn leverage_brackets(&self, symbol: &str) -> Result<Vec<NotionalBracket>> {
        let brackets: Vec<LeverageBracket> = self
            .signed_request(
                Method::GET,
                "/fapi/v1/leverageBracket",
                vec![("symbol".to_string(), symbol.to_string())],
            )
            .await
            .context("Failed to fetch leverage brackets")?;

        brackets
            .into_iter()
            .next()
            .map(|b| b.brackets)
            .ok_or_else(|| anyhow!("No leverage brackets returned for {}", symbol))
    }

    #[instrument(skip(self))]
    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<()> {
        let _: serde_json::Value = self
            .signed_request(
                Method::POST,
                "/fapi/v1/leverage",
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("leverage".to_string(), leverage.to_string()),
                ],
            )
            .await
            .context("Failed to set leverage")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> Result<()> {
        let result: Result<serde_json::Value> = self
            .signed_request(
                Method::POST,
                "/fapi/v1/marginType",
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("marginType".to_string(), margin_type.as_str().to_string()),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            // This endpoint returns an error if margin type is already set
            Err(e) if e.to_string().contains(&NO_NEED_TO_CHANGE_MARGIN_TYPE.to_string()) => {
                debug!(%symbol, margin_type = margin_type.as_str(), "Margin type already set");
                Ok(())
            }
            Err(e) => Err(e.context("Failed to set margin type")),
        }
    }

    #[instrument(skip(self))]
    async fn symbol_price(&self, symbol: &str) -> Result<Decimal> {
        let ticker: TickerPrice = self
            .public_get(
                "/fapi/v1/ticker/price",
                vec![("symbol".to_string(), symbol.to_string())],
            )
            .await
            .context("Failed to fetch symbol price")?;
        Ok(ticker.price)
    }

    // ==================== Orders (Authenticated) ====================

    #[instrument(skip(self))]
    async fn place_order(&self, order: &NewOrder) -> Result<OrderResponse> {
        let mut params = vec![
            ("symbol".to_string(), order.symbol.clone()),
            ("side".to_string(), order.side.as_str().to_string()),
            ("type".to_string(), order.order_type.as_str().to_string()),
        ];

        if let Some(qty) = order.quantity {
            params.push(("quantity".to_string(), to_wire(qty)));
        }

        if let Some(price) = order.price {
            params.push(("price".to_string(), to_wire(price)));
        }

        if let Some(stop_price) = order.stop_price {
            params.push(("stopPrice".to_string(), to_wire(stop_price)));
        }

        if let Some(tif) = order.time_in_force {
            params.push(("timeInForce".to_string(), tif.as_str().to_string()));
        }

        if let Some(reduce_only) = order.reduce_only {
            params.push(("reduceOnly".to_string(), reduce_only.to_string()));
        }

        if let Some(close_position) = order.close_position {
            params.push(("closePosition".to_string(), close_position.to_string()));
        }

        if let Some(working_type) = order.working_type {
            params.push(("workingType".to_string(), working_type.as_str().to_string()));
        }

        if let Some(client_id) = &order.new_client_order_id {
            params.push(("newClientOrderId".to_string(), client_id.clone()));
        }

        debug!("Placing futures order: {:?}", order);

        self.signed_request(Method::POST, "/fapi/v1/order", params)
            .await
            .context("Failed to place futures order")
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<OrderResponse> {
        self.signed_request(
            Method::DELETE,
            "/fapi/v1/order",
            vec![
                ("symbol".to_string(), symbol.to_string()),
                ("orderId".to_string(), order_id.to_string()),
            ],
        )
        .await
        .context("Failed to cancel futures order")
    }

    #[instrument(skip(self))]
    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderResponse>> {
        self.signed_request(
            Method::GET,
            "/fapi/v1/openOrders",
            vec![("symbol".to_string(), symbol.to_string())],
        )
        .await
        .context("Failed to fetch open orders")
    }

    #[instrument(skip(self))]
    async fn position_risk(&self, symbol: &str) -> Result<PositionRisk> {
        let positions: Vec<PositionRisk> = self
            .signed_request(
                Method::GET,
                "/fapi/v2/positionRisk",
                vec![("symbol".to_string(), symbol.to_string())],
            )
            .await
            .context("Failed to fetch position risk")?;

        match positions.into_iter().find(|p| p.symbol == symbol) {
            Some(position) => Ok(position),
            None => bail!("No position data returned for {}", symbol),
        }
    }
}
