//! Kite Connect order adapter.
//!
//! Speaks the Kite Connect v3 REST surface: form-urlencoded order
//! placement on the `regular` and `amo` varieties, token-pair
//! authorization, and a profile probe for health. HTTP outcomes are run
//! through the taxonomy in `error.rs`; an auth failure is reported, never
//! fatal, since only the operator can rotate the access token.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{debug, info, warn};
use volley_core::{Order, OrderSide, OrderType};

use crate::error::{classify_http, classify_transport, BrokerError, BrokerResult};
use crate::{BrokerClient, Placement, SymbolStatus};

/// Production endpoint; override via `broker.base_url`.
pub const DEFAULT_BASE_URL: &str = "https://api.kite.trade";

const KITE_VERSION_HEADER: &str = "X-Kite-Version";
const KITE_VERSION: &str = "3";

const VARIETY_REGULAR: &str = "regular";
const VARIETY_AMO: &str = "amo";

#[derive(Debug, Deserialize)]
struct KiteResponse {
    status: String,
    #[serde(default)]
    data: Option<KiteOrderData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KiteOrderData {
    order_id: String,
}

/// Kite Connect broker client.
pub struct KiteClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: String,
    product: String,
}

impl KiteClient {
    /// Build a client from credentials. The access token is the rotatable
    /// credential; rotation happens outside this process.
    pub fn new(
        api_key: impl Into<String>,
        access_token: impl Into<String>,
        base_url: Option<String>,
    ) -> BrokerResult<Self> {
        let api_key = api_key.into();
        let access_token = access_token.into();
        if api_key.is_empty() {
            return Err(BrokerError::Auth("api key is required".into()));
        }
        if access_token.is_empty() {
            return Err(BrokerError::Auth("access token is required".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| BrokerError::Unknown(format!("http client build failed: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            access_token,
            product: "MIS".to_string(),
        })
    }

    /// Override the product code sent with every order (default `MIS`).
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = product.into();
        self
    }

    fn authorization(&self) -> String {
        format!("token {}:{}", self.api_key, self.access_token)
    }

    /// Split `"BSE:RELIANCE"` into venue and tradingsymbol; bare symbols
    /// use the order's exchange.
    fn split_symbol(order: &Order) -> (String, String) {
        match order.symbol.split_once(':') {
            Some((venue, symbol)) => (venue.to_uppercase(), symbol.to_uppercase()),
            None => (order.exchange.to_uppercase(), order.symbol.to_uppercase()),
        }
    }

    fn order_params(&self, order: &Order, variety: &str) -> Vec<(&'static str, String)> {
        let (exchange, tradingsymbol) = Self::split_symbol(order);
        let mut params = vec![
            ("exchange", exchange),
            ("tradingsymbol", tradingsymbol),
            (
                "transaction_type",
                match order.side {
                    OrderSide::Buy => "BUY".to_string(),
                    OrderSide::Sell => "SELL".to_string(),
                },
            ),
            (
                "order_type",
                match order.order_type {
                    OrderType::Market => "MARKET".to_string(),
                    OrderType::Limit => "LIMIT".to_string(),
                },
            ),
            ("variety", variety.to_string()),
            ("quantity", order.quantity.to_string()),
            ("product", self.product.clone()),
            ("validity", "DAY".to_string()),
        ];
        if order.order_type == OrderType::Limit {
            params.push(("price", order.price.to_string()));
        }
        params
    }

    async fn place(&self, order: &Order, variety: &str) -> BrokerResult<Placement> {
        let url = format!("{}/orders/{variety}", self.base_url);
        let params = self.order_params(order, variety);

        debug!(order_id = %order.id, variety, url = %url, "Placing order");

        let response = self
            .http
            .post(&url)
            .header(KITE_VERSION_HEADER, KITE_VERSION)
            .header(AUTHORIZATION, self.authorization())
            .form(&params)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::Network(format!("failed to read response: {e}")))?;

        if !(200..300).contains(&status) {
            return Err(classify_http(status, &body));
        }

        let parsed: KiteResponse = serde_json::from_str(&body)
            .map_err(|e| BrokerError::Unknown(format!("unparseable response: {e}: {body}")))?;

        if parsed.status != "success" {
            let message = parsed.message.unwrap_or_else(|| "order placement failed".into());
            return Err(classify_reject(&message));
        }

        let order_id = parsed
            .data
            .map(|d| d.order_id)
            .ok_or_else(|| BrokerError::Unknown("success response without order_id".into()))?;

        info!(order_id = %order.id, broker_ref = %order_id, variety, "Order placed");
        Ok(Placement {
            broker_ref: order_id,
        })
    }
}

/// Classify a business rejection carried in a 2xx envelope.
fn classify_reject(message: &str) -> BrokerError {
    let lowered = message.to_lowercase();
    if lowered.contains("token") || lowered.contains("api_key") || lowered.contains("session") {
        BrokerError::Auth(message.to_string())
    } else {
        BrokerError::Invalid(message.to_string())
    }
}

/// Whether a rejection names the market being closed, in which case the
/// order can still be queued on the after-market channel.
fn is_market_closed_reject(err: &BrokerError) -> bool {
    let lowered = err.detail().to_lowercase();
    lowered.contains("market") && (lowered.contains("closed") || lowered.contains("amo"))
}

#[async_trait]
impl BrokerClient for KiteClient {
    async fn place_regular(&self, order: &Order) -> BrokerResult<Placement> {
        match self.place(order, VARIETY_REGULAR).await {
            Err(err) if is_market_closed_reject(&err) => {
                // The exchange shut between stamping and dispatch; queue the
                // order for the next session instead of dropping it.
                info!(
                    order_id = %order.id,
                    reason = %err,
                    "Regular placement rejected as market-closed, falling back to AMO"
                );
                self.place(order, VARIETY_AMO).await
            }
            other => other,
        }
    }

    async fn place_amo(&self, order: &Order) -> BrokerResult<Placement> {
        self.place(order, VARIETY_AMO).await
    }

    async fn health(&self) -> BrokerResult<()> {
        let url = format!("{}/user/profile", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(KITE_VERSION_HEADER, KITE_VERSION)
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_http(status, &body))
        }
    }

    async fn validate_symbol(&self, exchange: &str, symbol: &str) -> BrokerResult<SymbolStatus> {
        let url = format!("{}/quote/ltp", self.base_url);
        let instrument = format!("{}:{}", exchange.to_uppercase(), symbol.to_uppercase());
        let response = self
            .http
            .get(&url)
            .query(&[("i", instrument.as_str())])
            .header(KITE_VERSION_HEADER, KITE_VERSION)
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(SymbolStatus::Known),
            // A key without market-data permission cannot probe quotes;
            // treat the symbol as known rather than block dispatch.
            403 => {
                warn!(%instrument, "Symbol probe denied, assuming known");
                Ok(SymbolStatus::Known)
            }
            400 | 404 => Ok(SymbolStatus::Unknown),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(classify_http(status, &body))
            }
        }
    }
}
