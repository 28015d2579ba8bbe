use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use paygate_ratelimit::SlidingWindowLimiter;
use rand::Rng;
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::error::WebhookError;
use crate::event::WebhookEvent;
use crate::ssrf;

type HmacSha256 = Hmac<Sha256>;

/// Upper bound on a single emitter's dead-letter ring buffer.
pub const MAX_DEAD_LETTERS: usize = 500;

/// Upper bound on the number of deliveries that may be pending retry.
pub const MAX_QUEUE_LEN: usize = 5_000;

const DELIVER_TIMEOUT: Duration = Duration::from_secs(10);
const BASE_BACKOFF_MS: i64 = 1_000;
const MAX_BACKOFF_MS: i64 = 300_000;

#[derive(Debug, Clone)]
pub struct QueuedDelivery {
    pub event: WebhookEvent,
    pub attempt: u32,
    pub next_attempt_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    pub event: WebhookEvent,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EmitterStats {
    pub delivered: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

/// One outbound destination. Owns its own retry queue, dead-letter ring
/// buffer, and outbound rate limiter; `process_due` drives delivery from a
/// server-owned periodic tick.
pub struct Emitter {
    pub url: String,
    secret: Option<String>,
    client: reqwest::Client,
    queue: Mutex<VecDeque<QueuedDelivery>>,
    dead_letters: Mutex<VecDeque<DeadLetterEntry>>,
    stats: Mutex<EmitterStats>,
    outbound_limiter: SlidingWindowLimiter,
    max_retries: u32,
    enforce_ssrf_guard: bool,
    outbound_limit: u32,
    outbound_window_ms: u64,
}

impl Emitter {
    #[must_use]
    pub fn new(url: impl Into<String>, secret: Option<String>, max_retries: u32) -> Self {
        Self {
            url: url.into(),
            secret,
            client: reqwest::Client::builder()
                .timeout(DELIVER_TIMEOUT)
                .build()
                .expect("failed to build webhook HTTP client"),
            queue: Mutex::new(VecDeque::new()),
            dead_letters: Mutex::new(VecDeque::new()),
            stats: Mutex::new(EmitterStats::default()),
            outbound_limiter: SlidingWindowLimiter::new(),
            max_retries,
            enforce_ssrf_guard: true,
            outbound_limit: 60,
            outbound_window_ms: 60_000,
        }
    }

    pub fn set_ssrf_guard(&mut self, enforce: bool) {
        self.enforce_ssrf_guard = enforce;
    }

    pub async fn enqueue(&self, event: WebhookEvent) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= MAX_QUEUE_LEN {
            queue.pop_front();
        }
        queue.push_back(QueuedDelivery {
            event,
            attempt: 0,
            next_attempt_at: Utc::now(),
        });
    }

    #[must_use]
    pub async fn stats(&self) -> EmitterStats {
        *self.stats.lock().await
    }

    #[must_use]
    pub async fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.lock().await.iter().cloned().collect()
    }

    fn can_deliver(&self, now: DateTime<Utc>) -> bool {
        self.outbound_limiter
            .check(&self.url, self.outbound_limit, self.outbound_window_ms, now)
            .allowed
    }

    fn sign(&self, body: &[u8]) -> Result<Option<String>, WebhookError> {
        let Some(secret) = &self.secret else {
            return Ok(None);
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| WebhookError::SigningError(e.to_string()))?;
        mac.update(body);
        Ok(Some(hex::encode(mac.finalize().into_bytes())))
    }

    async fn ssrf_check(&self) -> Result<(), WebhookError> {
        if !self.enforce_ssrf_guard {
            return Ok(());
        }
        let Ok(parsed) = reqwest::Url::parse(&self.url) else {
            return Err(WebhookError::SsrfBlocked(format!("unparseable url {}", self.url)));
        };
        let Some(host) = parsed.host_str() else {
            return Err(WebhookError::SsrfBlocked("url has no host".to_string()));
        };
        ssrf::resolve_and_check(host)
            .await
            .map_err(WebhookError::SsrfBlocked)
    }

    async fn deliver(&self, event: &WebhookEvent) -> Result<(), WebhookError> {
        self.ssrf_check().await?;

        let body = serde_json::to_vec(event).map_err(|e| WebhookError::SigningError(e.to_string()))?;
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "paygate-webhook/1.0")
            .header("X-Paygate-Timestamp", Utc::now().timestamp().to_string())
            .body(body.clone());

        if let Some(signature) = self.sign(&body)? {
            request = request.header("X-Paygate-Signature", format!("sha256={signature}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::UnexpectedStatus { status: status.as_u16() })
        }
    }

    fn backoff_with_jitter(attempt: u32) -> chrono::Duration {
        let exp = BASE_BACKOFF_MS.saturating_mul(1i64 << attempt.min(8)).min(MAX_BACKOFF_MS);
        let jitter = rand::thread_rng().gen_range(0..=exp / 4 + 1);
        chrono::Duration::milliseconds(exp + jitter)
    }

    async fn dead_letter(&self, event: WebhookEvent, attempts: u32, error: String) {
        let mut dead_letters = self.dead_letters.lock().await;
        if dead_letters.len() >= MAX_DEAD_LETTERS {
            dead_letters.pop_front();
        }
        dead_letters.push_back(DeadLetterEntry {
            event,
            attempts,
            last_error: error,
            failed_at: Utc::now(),
        });
        self.stats.lock().await.dead_lettered += 1;
    }

    /// Attempts every delivery whose `next_attempt_at` has passed. Retried
    /// deliveries are re-enqueued with exponential backoff and jitter;
    /// permanent failures (4xx, SSRF block) and retry exhaustion go
    /// straight to the dead-letter buffer.
    pub async fn process_due(&self, now: DateTime<Utc>) {
        let due: Vec<QueuedDelivery> = {
            let mut queue = self.queue.lock().await;
            let mut due = Vec::new();
            let mut remaining = VecDeque::with_capacity(queue.len());
            for item in queue.drain(..) {
                if item.next_attempt_at <= now {
                    due.push(item);
                } else {
                    remaining.push_back(item);
                }
            }
            *queue = remaining;
            due
        };

        for item in due {
            if !self.can_deliver(now) {
                let mut queue = self.queue.lock().await;
                queue.push_back(QueuedDelivery {
                    next_attempt_at: now + chrono::Duration::milliseconds(1_000),
                    ..item
                });
                continue;
            }

            match self.deliver(&item.event).await {
                Ok(()) => {
                    self.stats.lock().await.delivered += 1;
                }
                Err(err) if err.is_retryable() && item.attempt + 1 < self.max_retries => {
                    self.stats.lock().await.retried += 1;
                    let mut queue = self.queue.lock().await;
                    queue.push_back(QueuedDelivery {
                        event: item.event,
                        attempt: item.attempt + 1,
                        next_attempt_at: now + Self::backoff_with_jitter(item.attempt),
                    });
                }
                Err(err) => {
                    self.dead_letter(item.event, item.attempt + 1, err.to_string()).await;
                }
            }
        }
    }
}
