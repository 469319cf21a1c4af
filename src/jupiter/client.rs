//! Rate-limited Jupiter quote client.
//!
//! One public operation: exact-in quote. Transient failures (429, 5xx,
//! network) are retried with capped backoff. Classified 400s are treated
//! as authoritative negative facts: they land in the negative cache and,
//! for the tradability/route classes, fan out as skip events. The skip
//! channel is best-effort and never changes the returned result.

use std::time::Duration;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::cache::NegativeCache;
use super::rate_limit::RequestGate;
use super::throttle::LogThrottle;
use super::types::{
    JupQuote, QuoteErrorBody, QuoteResponse, SkipEvent, ERR_AMOUNT_TOO_BIG, ERR_NO_ROUTE,
    ERR_TOKEN_NOT_TRADABLE,
};

/// Mint block after TOKEN_NOT_TRADABLE.
const TTL_NOT_TRADABLE: Duration = Duration::from_secs(6 * 3600);
/// Short pair block alongside a not-tradable mint block.
const TTL_NOT_TRADABLE_PAIR: Duration = Duration::from_secs(60);
/// Pair block after COULD_NOT_FIND_ANY_ROUTE.
const TTL_NO_ROUTE: Duration = Duration::from_secs(5 * 60);
/// Pair block after ROUTE_PLAN_DOES_NOT_CONSUME_ALL_THE_AMOUNT.
const TTL_AMOUNT_TOO_BIG: Duration = Duration::from_secs(90);

const MAX_RETRY_DELAY_SEC: f64 = 6.0;
const LOG_THROTTLE_WINDOW: Duration = Duration::from_secs(30);

static MINT_RE: Lazy<Regex> = Lazy::new(|| {
    // Base58 Solana pubkey embedded in an error message.
    Regex::new(r"[1-9A-HJ-NP-Za-km-z]{32,44}").unwrap()
});

#[derive(Debug, Clone)]
pub struct JupiterClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub slippage_bps: u16,
    pub restrict_intermediate_tokens: bool,
    pub max_accounts: u32,
    pub rps: u32,
    pub concurrency: usize,
    pub max_retries: u32,
}

pub struct JupiterClient {
    http: reqwest::Client,
    cfg: JupiterClientConfig,
    gate: RequestGate,
    cache: NegativeCache,
    throttle: LogThrottle,
    skip_tx: Option<mpsc::Sender<SkipEvent>>,
}

impl JupiterClient {
    pub fn new(
        cfg: JupiterClientConfig,
        skip_tx: Option<mpsc::Sender<SkipEvent>>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        let gate = RequestGate::new(cfg.rps, cfg.concurrency);
        Ok(Self {
            http,
            cfg,
            gate,
            cache: NegativeCache::new(),
            throttle: LogThrottle::new(LOG_THROTTLE_WINDOW),
            skip_tx,
        })
    }

    /// Exact-in quote; `None` covers every failure mode.
    pub async fn quote_exact_in(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount_raw: u128,
    ) -> Option<JupQuote> {
        self.cache.maybe_prune();
        if self.cache.is_blocked(input_mint, output_mint) {
            debug!(input_mint, output_mint, "quote short-circuited by negative cache");
            return None;
        }

        let url = format!("{}/quote", self.cfg.base_url.trim_end_matches('/'));
        let amount = amount_raw.to_string();
        let slippage = self.cfg.slippage_bps.to_string();
        let max_accounts = self.cfg.max_accounts.to_string();
        let restrict = if self.cfg.restrict_intermediate_tokens {
            "true"
        } else {
            "false"
        };
        let params: [(&str, &str); 8] = [
            ("inputMint", input_mint),
            ("outputMint", output_mint),
            ("amount", &amount),
            ("swapMode", "ExactIn"),
            ("slippageBps", &slippage),
            ("restrictIntermediateTokens", restrict),
            ("maxAccounts", &max_accounts),
            ("instructionVersion", "V1"),
        ];

        let max_attempts = self.cfg.max_retries.max(1);
        for attempt in 0..max_attempts {
            let resp = {
                let _permit = self.gate.acquire().await;
                let mut req = self.http.get(&url).query(&params);
                if !self.cfg.api_key.is_empty() {
                    req = req.header("x-api-key", &self.cfg.api_key);
                }
                req.send().await
            };

            let resp = match resp {
                Ok(r) => r,
                Err(e) => {
                    if attempt + 1 < max_attempts {
                        let wait = retry_delay(attempt, None);
                        debug!(error = %e, attempt, wait_ms = wait.as_millis() as u64, "quote transport error, retrying");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    if self.throttle.allow("quote_transport_error") {
                        warn!(error = %e, input_mint, output_mint, "quote failed after retries");
                    }
                    return None;
                }
            };

            let status = resp.status();
            if status.is_success() {
                return match resp.json::<QuoteResponse>().await {
                    Ok(body) => body.into_quote().or_else(|| {
                        if self.throttle.allow("quote_bad_amounts") {
                            warn!(input_mint, output_mint, "quote body had non-numeric amounts");
                        }
                        None
                    }),
                    Err(e) => {
                        if self.throttle.allow("quote_parse_error") {
                            warn!(error = %e, input_mint, output_mint, "failed to parse quote body");
                        }
                        None
                    }
                };
            }

            let retry_after = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = resp.text().await.unwrap_or_default();

            if status.as_u16() == 429 || status.is_server_error() {
                if attempt + 1 < max_attempts {
                    let wait = retry_delay(attempt, retry_after.as_deref());
                    if self.throttle.allow(&format!("quote_retry_{}", status.as_u16())) {
                        warn!(
                            status = status.as_u16(),
                            attempt = attempt + 1,
                            wait_ms = wait.as_millis() as u64,
                            body = %truncate(&body, 200),
                            "quote retry"
                        );
                    }
                    tokio::time::sleep(wait).await;
                    continue;
                }
                if self.throttle.allow("quote_retries_exhausted") {
                    warn!(status = status.as_u16(), input_mint, output_mint, "quote retries exhausted");
                }
                return None;
            }

            if status.as_u16() == 400 {
                self.handle_classified_400(input_mint, output_mint, &body);
                return None;
            }

            if self.throttle.allow(&format!("quote_status_{}", status.as_u16())) {
                warn!(status = status.as_u16(), body = %truncate(&body, 300), "quote failed");
            }
            return None;
        }

        None
    }

    fn handle_classified_400(&self, input_mint: &str, output_mint: &str, body: &str) {
        let parsed: QuoteErrorBody = serde_json::from_str(body).unwrap_or_default();
        match parsed.error_code.as_str() {
            ERR_TOKEN_NOT_TRADABLE => {
                let bad_mint = extract_mint(&parsed.error)
                    .unwrap_or_else(|| output_mint.to_string());
                self.cache.block_mint(&bad_mint, TTL_NOT_TRADABLE);
                self.cache
                    .block_pair(input_mint, output_mint, TTL_NOT_TRADABLE_PAIR);
                self.emit_skip(ERR_TOKEN_NOT_TRADABLE, input_mint, output_mint, &bad_mint, &parsed.error);
                if self.throttle.allow(&format!("not_tradable:{bad_mint}")) {
                    warn!(mint = %bad_mint, "token not tradable, blocked");
                }
            }
            ERR_NO_ROUTE => {
                self.cache.block_pair(input_mint, output_mint, TTL_NO_ROUTE);
                self.emit_skip(ERR_NO_ROUTE, input_mint, output_mint, "", &parsed.error);
                if self.throttle.allow(&format!("no_route:{input_mint}:{output_mint}")) {
                    warn!(input_mint, output_mint, "no route, pair blocked");
                }
            }
            ERR_AMOUNT_TOO_BIG => {
                self.cache
                    .block_pair(input_mint, output_mint, TTL_AMOUNT_TOO_BIG);
                if self.throttle.allow(&format!("amount_too_big:{input_mint}:{output_mint}")) {
                    warn!(input_mint, output_mint, "route cannot consume amount, pair blocked");
                }
            }
            other => {
                if self.throttle.allow(&format!("quote_400:{other}")) {
                    warn!(code = other, body = %truncate(body, 300), "unclassified quote 400");
                }
            }
        }
    }

    fn emit_skip(&self, code: &str, input_mint: &str, output_mint: &str, bad_mint: &str, msg: &str) {
        if let Some(tx) = &self.skip_tx {
            let event = SkipEvent {
                code: code.to_string(),
                input_mint: input_mint.to_string(),
                output_mint: output_mint.to_string(),
                bad_mint: bad_mint.to_string(),
                msg: msg.to_string(),
            };
            // Dropping the event when the channel is full is fine; the
            // sanitizer works on repeated hits, not single deliveries.
            let _ = tx.try_send(event);
        }
    }
}

fn retry_delay(attempt: u32, retry_after: Option<&str>) -> Duration {
    if let Some(v) = retry_after {
        if let Ok(secs) = v.trim().parse::<f64>() {
            return Duration::from_secs_f64(secs.max(0.0));
        }
    }
    let base = 0.25 * 2f64.powi(attempt as i32);
    let jitter = rand::thread_rng().gen_range(0.0..0.2);
    Duration::from_secs_f64((base + jitter).min(MAX_RETRY_DELAY_SEC))
}

fn extract_mint(msg: &str) -> Option<String> {
    MINT_RE.find(msg).map(|m| m.as_str().to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
