//! Refinement orchestrator.
//!
//! Turns a flushed paragraph's raw text into a cleaned-up version via the
//! configured backend, without reordering or duplicating output and without
//! exceeding the backend's rate limits. Refinement is an enhancement, not a
//! correctness-critical path: a paragraph whose refinement permanently
//! fails keeps its raw broadcast as the only record.

mod backend;

pub use backend::{GEMINI_BASE_URL, LEMUR_TASK_URL, REFINE_INSTRUCTION, RefineBackend};

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::core::buffer::ParagraphEvent;
use crate::core::session::{ClientEvent, RefinedParagraph, SessionRegistry};
use crate::utils::now_rfc3339;

/// Errors from one refinement attempt.
#[derive(Debug, Error)]
pub enum RefineError {
    /// Backend signalled too many requests. Retried after the hint (or the
    /// configured fallback backoff); never dropped.
    #[error("Refinement rate limited by backend")]
    RateLimited { retry_after: Option<Duration> },

    /// Transport-level failure.
    #[error("Refinement request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Backend answered with a non-success status other than 429.
    #[error("Refinement backend returned status {0}")]
    BackendStatus(u16),

    /// Response parsed but carried no recognizable text field.
    #[error("Refinement response carried no recognizable text field")]
    MissingText,

    /// Backend answered with empty or whitespace-only text.
    #[error("Refinement backend returned empty output")]
    EmptyOutput,
}

/// Orchestrates refinement calls with per-session cooldown throttling and
/// rate-limit retries.
pub struct RefineOrchestrator {
    backend: Option<RefineBackend>,
    client: reqwest::Client,
    cooldown: Duration,
    retry_backoff: Duration,
    registry: Arc<SessionRegistry>,
    /// Completion time of the last successful call per session.
    last_call: DashMap<String, Instant>,
}

impl RefineOrchestrator {
    pub fn new(
        backend: Option<RefineBackend>,
        cooldown: Duration,
        retry_backoff: Duration,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            backend,
            client: reqwest::Client::new(),
            cooldown,
            retry_backoff,
            registry,
            last_call: DashMap::new(),
        }
    }

    pub fn from_config(config: &ServerConfig, registry: Arc<SessionRegistry>) -> Self {
        let backend = RefineBackend::from_config(config);
        match &backend {
            Some(backend) => info!(
                provider = backend.name(),
                model = %config.refine_model,
                "Refinement backend configured"
            ),
            None => warn!(
                provider = %config.refine_provider,
                "Refinement backend not usable (missing credentials or endpoint); \
                 paragraphs will be broadcast raw only"
            ),
        }
        Self::new(
            backend,
            config.refine_cooldown,
            config.refine_retry_backoff,
            registry,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Fire-and-forget entry point used by the buffer scheduler: refinement
    /// must never delay the raw paragraph broadcast.
    pub fn spawn_refine(self: &Arc<Self>, event: ParagraphEvent) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.refine_and_broadcast(event).await;
        });
    }

    /// Refine one paragraph and broadcast the result. Re-invoking for the
    /// same event is safe: the event is immutable and carries its own
    /// paragraph number, so a client seeing two refined messages for one
    /// number simply takes the latest.
    pub async fn refine_and_broadcast(self: Arc<Self>, event: ParagraphEvent) {
        let Some(backend) = self.backend.as_ref() else {
            debug!(
                session_id = %event.session_id,
                "Refinement disabled, keeping raw paragraph only"
            );
            return;
        };

        // The session may have been destroyed while this task waited on a
        // delay; everything downstream would be a no-op, so stop early.
        if !self.registry.contains(&event.session_id) {
            debug!(
                session_id = %event.session_id,
                paragraph_number = event.paragraph_number,
                "Session gone before refinement, dropping"
            );
            return;
        }

        // Cooldown throttle: a call landing inside the window is deferred
        // by the remaining time, not dropped.
        if let Some(remaining) = self.cooldown_remaining(&event.session_id) {
            debug!(
                session_id = %event.session_id,
                paragraph_number = event.paragraph_number,
                defer_ms = remaining.as_millis() as u64,
                "Deferring refinement for cooldown"
            );
            self.reschedule(event, remaining);
            return;
        }

        match backend.refine(&self.client, &event.text).await {
            Ok(refined) => {
                self.last_call
                    .insert(event.session_id.clone(), Instant::now());
                info!(
                    session_id = %event.session_id,
                    paragraph_number = event.paragraph_number,
                    chars = refined.len(),
                    "Paragraph refined"
                );
                self.registry
                    .broadcast(
                        &event.session_id,
                        ClientEvent::ParagraphRefined {
                            data: RefinedParagraph {
                                session_id: event.session_id.clone(),
                                paragraph_number: event.paragraph_number,
                                refined_text: refined,
                                completed_at: now_rfc3339(),
                            },
                        },
                        None,
                    )
                    .await;
            }

            Err(RefineError::RateLimited { retry_after }) => {
                let delay = retry_after.unwrap_or(self.retry_backoff);
                warn!(
                    session_id = %event.session_id,
                    paragraph_number = event.paragraph_number,
                    retry_ms = delay.as_millis() as u64,
                    "Refinement rate limited, rescheduling"
                );
                self.reschedule(event, delay);
            }

            Err(e) => {
                warn!(
                    session_id = %event.session_id,
                    paragraph_number = event.paragraph_number,
                    "Refinement failed, keeping raw paragraph only: {e}"
                );
            }
        }
    }

    /// Time left in the session's cooldown window, if any.
    fn cooldown_remaining(&self, session_id: &str) -> Option<Duration> {
        let last = self.last_call.get(session_id)?;
        let elapsed = last.elapsed();
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    /// Re-invoke refinement for the same event after a delay. The delayed
    /// task tolerates the session having been destroyed in the interim.
    fn reschedule(self: &Arc<Self>, event: ParagraphEvent, delay: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.refine_and_broadcast(event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator(cooldown: Duration) -> Arc<RefineOrchestrator> {
        let registry = Arc::new(SessionRegistry::new());
        Arc::new(RefineOrchestrator::new(
            None,
            cooldown,
            Duration::from_secs(10),
            registry,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_remaining_counts_down() {
        let orch = orchestrator(Duration::from_secs(5));
        orch.last_call.insert("s1".to_string(), Instant::now());

        let remaining = orch.cooldown_remaining("s1").unwrap();
        assert_eq!(remaining, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(2)).await;
        let remaining = orch.cooldown_remaining("s1").unwrap();
        assert_eq!(remaining, Duration::from_secs(3));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(orch.cooldown_remaining("s1").is_none());
    }

    #[tokio::test]
    async fn test_cooldown_is_per_session() {
        let orch = orchestrator(Duration::from_secs(5));
        orch.last_call.insert("s1".to_string(), Instant::now());
        assert!(orch.cooldown_remaining("s1").is_some());
        assert!(orch.cooldown_remaining("s2").is_none());
    }

    #[tokio::test]
    async fn test_disabled_backend_drops_quietly() {
        let orch = orchestrator(Duration::from_secs(5));
        assert!(!orch.is_enabled());
        orch.clone()
            .refine_and_broadcast(ParagraphEvent {
                session_id: "s1".to_string(),
                paragraph_number: 1,
                text: "hello".to_string(),
                completed_at: now_rfc3339(),
            })
            .await;
    }
}
