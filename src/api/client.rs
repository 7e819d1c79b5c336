//! REST client for the exchange: public market data plus signed private
//! calls (balances, order placement, order lookup).

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use backoff::ExponentialBackoff;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

use super::types::{AccountBalance, OrderAck, OrderDetail, PlaceOrderRequest, Ticker};

const API_URL: &str = "https://api.upbit.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type HmacSha256 = Hmac<Sha256>;

/// Exchange REST client. Public endpoints need no credentials; private ones
/// are signed with the account's access/secret key pair.
pub struct ExchangeClient {
    http: Client,
    base_url: String,
    access_key: String,
    secret_key: String,
}

impl ExchangeClient {
    /// Build a client from `UPBIT_ACCESS_KEY` / `UPBIT_SECRET_KEY`.
    pub fn from_env() -> Result<Self> {
        let access_key =
            std::env::var("UPBIT_ACCESS_KEY").context("UPBIT_ACCESS_KEY not set")?;
        let secret_key =
            std::env::var("UPBIT_SECRET_KEY").context("UPBIT_SECRET_KEY not set")?;
        Self::new(API_URL.to_string(), access_key, secret_key)
    }

    /// Unauthenticated client for public market data only. Private calls
    /// made through it will be rejected by the exchange.
    pub fn public() -> Result<Self> {
        Self::new(API_URL.to_string(), String::new(), String::new())
    }

    pub fn new(base_url: String, access_key: String, secret_key: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            http,
            base_url,
            access_key,
            secret_key,
        })
    }

    // ==================== Public market data ====================

    /// Last traded price for each requested market. Transient failures are
    /// retried with exponential backoff before giving up.
    pub async fn current_prices(&self, markets: &[String]) -> Result<HashMap<String, Decimal>> {
        let url = format!("{}/ticker?markets={}", self.base_url, markets.join(","));

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(15)),
            ..Default::default()
        };

        let tickers: Vec<Ticker> = backoff::future::retry(policy, || async {
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(anyhow::Error::from(e)))?;

            if response.status().is_server_error() {
                return Err(backoff::Error::transient(anyhow::anyhow!(
                    "ticker request failed: {}",
                    response.status()
                )));
            }
            if !response.status().is_success() {
                return Err(backoff::Error::permanent(anyhow::anyhow!(
                    "ticker request failed: {}",
                    response.status()
                )));
            }

            response
                .json::<Vec<Ticker>>()
                .await
                .map_err(|e| backoff::Error::permanent(anyhow::Error::from(e)))
        })
        .await?;

        Ok(tickers
            .into_iter()
            .map(|t| (t.market, t.trade_price))
            .collect())
    }

    /// Last traded price for a single market.
    pub async fn current_price(&self, market: &str) -> Result<Decimal> {
        let prices = self.current_prices(&[market.to_string()]).await?;
        prices
            .get(market)
            .copied()
            .with_context(|| format!("no ticker returned for {market}"))
    }

    // ==================== Private endpoints ====================

    /// All asset balances on the account.
    pub async fn accounts(&self) -> Result<Vec<AccountBalance>> {
        let url = format!("{}/accounts", self.base_url);
        let token = self.auth_token(None)?;

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .context("failed to fetch accounts")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("accounts request failed: {status} - {body}");
        }

        response.json().await.context("failed to parse accounts")
    }

    /// Submit an order. The query-string form of the body is hashed into the
    /// auth token, as the exchange requires for parameterized calls.
    pub async fn place_order(&self, order: &PlaceOrderRequest) -> Result<OrderAck> {
        let url = format!("{}/orders", self.base_url);
        let query = order_query(order);
        let token = self.auth_token(Some(&query))?;

        debug!(market = %order.market, side = ?order.side, "submitting order");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(order)
            .send()
            .await
            .context("failed to submit order")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("order submission failed: {status} - {body}");
        }

        response.json().await.context("failed to parse order ack")
    }

    /// Look up a single order with its executions.
    pub async fn order_detail(&self, uuid: &str) -> Result<OrderDetail> {
        let url = format!("{}/order?uuid={}", self.base_url, uuid);
        let query = format!("uuid={uuid}");
        let token = self.auth_token(Some(&query))?;

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .context("failed to fetch order")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("order lookup failed: {status} - {body}");
        }

        response.json().await.context("failed to parse order detail")
    }

    /// Poll an order until the exchange reports it terminal, up to
    /// `attempts` polls spaced `interval` apart. Returns the last observed
    /// state either way; the caller decides what a non-terminal order means.
    pub async fn wait_for_order(
        &self,
        uuid: &str,
        attempts: u32,
        interval: Duration,
    ) -> Result<OrderDetail> {
        let mut detail = self.order_detail(uuid).await?;
        for _ in 1..attempts {
            if detail.is_terminal() {
                break;
            }
            tokio::time::sleep(interval).await;
            detail = self.order_detail(uuid).await?;
        }
        Ok(detail)
    }

    // ==================== Auth ====================

    /// Signed bearer token: base64url header/payload with an HMAC-SHA256
    /// signature over them; parameterized calls carry a SHA512 hash of the
    /// query string inside the payload.
    fn auth_token(&self, query: Option<&str>) -> Result<String> {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);

        let mut claims = json!({
            "access_key": self.access_key,
            "nonce": uuid::Uuid::new_v4().to_string(),
        });
        if let Some(query) = query {
            let digest = Sha512::digest(query.as_bytes());
            claims["query_hash"] = json!(hex::encode(digest));
            claims["query_hash_alg"] = json!("SHA512");
        }
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);

        let signing_input = format!("{header}.{payload}");
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .context("invalid secret key")?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }
}

/// Query-string form of an order request, with keys in lexical order so the
/// hash is deterministic.
fn order_query(order: &PlaceOrderRequest) -> String {
    let mut params: Vec<(&str, String)> = Vec::new();
    params.push(("market", order.market.clone()));
    params.push(("ord_type", format!("{:?}", order.ord_type).to_lowercase()));
    if let Some(price) = &order.price {
        params.push(("price", price.clone()));
    }
    params.push(("side", format!("{:?}", order.side).to_lowercase()));
    if let Some(volume) = &order.volume {
        params.push(("volume", volume.clone()));
    }
    params.sort_by(|a, b| a.0.cmp(b.0));
    params
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{OrderSide, OrderType};

    fn client() -> ExchangeClient {
        ExchangeClient::new(
            "http://localhost:1".to_string(),
            "access".to_string(),
            "secret".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_order_query_is_sorted_and_complete() {
        let order = PlaceOrderRequest {
            market: "KRW-BTC".to_string(),
            side: OrderSide::Bid,
            ord_type: OrderType::Price,
            volume: None,
            price: Some("100000".to_string()),
        };
        assert_eq!(
            order_query(&order),
            "market=KRW-BTC&ord_type=price&price=100000&side=bid"
        );
    }

    #[test]
    fn test_auth_token_shape() {
        let token = client().auth_token(Some("uuid=abc")).unwrap();
        let segments: Vec<&str> = token.split('.').collect();
        assert_eq!(segments.len(), 3);

        let payload = URL_SAFE_NO_PAD.decode(segments[1]).unwrap();
        let claims: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(claims["access_key"], "access");
        assert_eq!(claims["query_hash_alg"], "SHA512");
        assert!(claims["query_hash"].as_str().unwrap().len() == 128);
    }

    #[test]
    fn test_auth_token_without_query_omits_hash() {
        let token = client().auth_token(None).unwrap();
        let payload = URL_SAFE_NO_PAD
            .decode(token.split('.').nth(1).unwrap())
            .unwrap();
        let claims: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert!(claims.get("query_hash").is_none());
    }
}
