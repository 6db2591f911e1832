//! Per-session text buffer with silence-based debouncing.
//!
//! Formatted end-of-turn transcripts accumulate in a session's buffer;
//! every append restarts the flush timer, so rapid consecutive turns keep
//! deferring the flush and a quiet period of the full window is what
//! finally triggers it. A flush atomically drains the buffer into a
//! numbered paragraph, broadcasts it raw, and hands it to the refinement
//! orchestrator without waiting for the result.
//!
//! Buffer text and the live timer sit behind one async mutex per session:
//! append-and-rearm and read-and-clear each hold it across their await
//! points, so concurrent turn handlers and a racing termination flush
//! cannot interleave into a torn buffer. At most one timer is live per
//! session; arming a new one cancels the old token.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::refine::RefineOrchestrator;
use crate::core::session::{ClientEvent, ParagraphPayload, SessionRegistry};
use crate::utils::now_rfc3339;

/// One flushed span of buffered text. Immutable once created; flows by
/// value to the broadcast and to refinement.
#[derive(Debug, Clone)]
pub struct ParagraphEvent {
    pub session_id: String,
    pub paragraph_number: u64,
    pub text: String,
    pub completed_at: String,
}

#[derive(Default)]
struct BufferSlot {
    text: String,
    /// Cancels the pending flush sleeper. `Some` exactly while a timer is
    /// armed for the slot.
    timer: Option<CancellationToken>,
}

/// Debounce scheduler owning every session's text buffer and flush timer.
pub struct BufferScheduler {
    flush_window: Duration,
    registry: Arc<SessionRegistry>,
    refiner: Arc<RefineOrchestrator>,
    buffers: DashMap<String, Arc<Mutex<BufferSlot>>>,
}

impl BufferScheduler {
    pub fn new(
        flush_window: Duration,
        registry: Arc<SessionRegistry>,
        refiner: Arc<RefineOrchestrator>,
    ) -> Self {
        Self {
            flush_window,
            registry,
            refiner,
            buffers: DashMap::new(),
        }
    }

    /// Append transcript text to the session's buffer (space-joined to any
    /// prior content) and restart the flush timer.
    pub async fn append(self: &Arc<Self>, session_id: &str, text: &str) {
        let slot = self
            .buffers
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BufferSlot::default())))
            .value()
            .clone();

        let mut guard = slot.lock().await;
        if !guard.text.is_empty() {
            guard.text.push(' ');
        }
        guard.text.push_str(text);
        debug!(
            session_id,
            buffered_chars = guard.text.len(),
            "Appended transcript to buffer"
        );

        // Re-arm: the previous timer, if any, is cancelled first so at most
        // one sleeper is ever live for the session.
        if let Some(previous) = guard.timer.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        guard.timer = Some(token.clone());

        let scheduler = Arc::clone(self);
        let session_id = session_id.to_string();
        let window = self.flush_window;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(window) => {
                    scheduler.flush(&session_id).await;
                }
            }
        });
    }

    /// Atomically drain the session's buffer into a paragraph. A no-op when
    /// the buffer is empty or whitespace-only, or when the session no
    /// longer exists. Called by the expiring timer and by the upstream
    /// termination path; both routes share this single entry point, so one
    /// span of text can never produce two paragraphs.
    pub async fn flush(self: &Arc<Self>, session_id: &str) {
        let Some(slot) = self.buffers.get(session_id).map(|e| e.value().clone()) else {
            return;
        };

        let mut guard = slot.lock().await;

        // A forced flush (upstream termination) supersedes a pending timer.
        if let Some(timer) = guard.timer.take() {
            timer.cancel();
        }

        let text = std::mem::take(&mut guard.text);
        if text.trim().is_empty() {
            return;
        }

        let Some(paragraph_number) = self.registry.next_paragraph_number(session_id) else {
            // Session destroyed while text was buffered; nothing to deliver.
            debug!(session_id, "Discarding buffered text for absent session");
            return;
        };

        let event = ParagraphEvent {
            session_id: session_id.to_string(),
            paragraph_number,
            text,
            completed_at: now_rfc3339(),
        };

        info!(
            session_id,
            paragraph_number,
            chars = event.text.len(),
            "Flushing buffered text"
        );

        // Broadcast while still holding the slot so paragraph broadcasts
        // for one session keep their number order.
        self.registry
            .broadcast(
                session_id,
                ClientEvent::TextBufferComplete {
                    data: ParagraphPayload {
                        session_id: event.session_id.clone(),
                        paragraph_number: event.paragraph_number,
                        buffered_text: event.text.clone(),
                        completed_at: event.completed_at.clone(),
                    },
                },
                None,
            )
            .await;
        drop(guard);

        self.refiner.spawn_refine(event);
    }

    /// Drop the session's buffer and cancel any live timer without
    /// flushing. Used on session teardown.
    pub async fn cancel(&self, session_id: &str) {
        if let Some((_, slot)) = self.buffers.remove(session_id) {
            let mut guard = slot.lock().await;
            if let Some(timer) = guard.timer.take() {
                timer.cancel();
            }
            guard.text.clear();
            debug!(session_id, "Buffer cancelled");
        }
    }

    /// Buffered text for a session, for introspection and tests.
    pub async fn buffered_text(&self, session_id: &str) -> Option<String> {
        let slot = self.buffers.get(session_id).map(|e| e.value().clone())?;
        let guard = slot.lock().await;
        Some(guard.text.clone())
    }
}
