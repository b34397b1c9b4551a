//! Per-message decoding and micro-batch buffer assembly (spec.md §4.D).

use std::time::Instant;

use serde_json::Value;
use tracing::debug;

use crate::model::{RequestEnvelope, ResultEnvelope, FEATURE_DIM};

/// One message admitted into the current batch buffer, carrying everything
/// needed to score it and to ack/nack the originating delivery.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub vector: Vec<f64>,
    pub subject_id: String,
    pub request_id: String,
    pub delivery_tag: u64,
}

/// Outcome of decoding one raw broker payload.
pub enum DecodeOutcome {
    /// A well-formed request ready to be buffered for scoring.
    Accepted(PendingMessage),
    /// The payload was malformed or had the wrong vector shape; an ERROR
    /// envelope is ready for immediate dispatch and the message should be
    /// ack'd without ever entering the batch buffer (spec.md §4.D step 3).
    Rejected {
        envelope: ResultEnvelope,
        delivery_tag: u64,
    },
}

/// Decode one raw broker payload per spec.md §4.D steps 1-3:
///
/// 1. UTF-8 then JSON; if the outer JSON value is itself a string, decode a
///    second time (the legacy double-encoding case).
/// 2. Extract `requestId`, `subjectId`, and either `vector` or the 35 flat
///    `feature_N` fields.
/// 3. Missing/wrong-length vector → synthesise an ERROR envelope instead of
///    buffering.
pub fn decode_message(payload: &[u8], delivery_tag: u64) -> DecodeOutcome {
    let text = match std::str::from_utf8(payload) {
        Ok(t) => t,
        Err(_) => {
            return DecodeOutcome::Rejected {
                envelope: ResultEnvelope::error(
                    String::new(),
                    String::new(),
                    "payload is not valid UTF-8",
                ),
                delivery_tag,
            }
        }
    };

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            return DecodeOutcome::Rejected {
                envelope: ResultEnvelope::error(
                    String::new(),
                    String::new(),
                    format!("malformed JSON: {err}"),
                ),
                delivery_tag,
            }
        }
    };

    // Legacy double-encoding case: the outer JSON value is itself a string
    // containing the real object.
    let value = match value {
        Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
            Ok(v) => v,
            Err(err) => {
                return DecodeOutcome::Rejected {
                    envelope: ResultEnvelope::error(
                        String::new(),
                        String::new(),
                        format!("malformed nested JSON: {err}"),
                    ),
                    delivery_tag,
                }
            }
        },
        other => other,
    };

    let envelope: RequestEnvelope = match serde_json::from_value(value) {
        Ok(e) => e,
        Err(err) => {
            return DecodeOutcome::Rejected {
                envelope: ResultEnvelope::error(
                    String::new(),
                    String::new(),
                    format!("malformed request envelope: {err}"),
                ),
                delivery_tag,
            }
        }
    };

    match envelope.resolve_vector() {
        Some(vector) if vector.len() == FEATURE_DIM => DecodeOutcome::Accepted(PendingMessage {
            vector,
            subject_id: envelope.subject_id,
            request_id: envelope.request_id,
            delivery_tag,
        }),
        Some(vector) => {
            debug!(len = vector.len(), "rejecting vector with wrong dimension");
            DecodeOutcome::Rejected {
                envelope: ResultEnvelope::error(
                    envelope.request_id,
                    envelope.subject_id,
                    format!("dimension mismatch: expected {FEATURE_DIM} features, got {}", vector.len()),
                ),
                delivery_tag,
            }
        }
        None => DecodeOutcome::Rejected {
            envelope: ResultEnvelope::error(
                envelope.request_id,
                envelope.subject_id,
                "missing vector: no `vector` field or feature_1..feature_35",
            ),
            delivery_tag,
        },
    }
}

/// Mutable micro-batch buffer: fires on size-or-age (spec.md §4.D).
pub struct BatchBuffer {
    messages: Vec<PendingMessage>,
    oldest: Option<Instant>,
    max_size: usize,
    max_age: std::time::Duration,
}

impl BatchBuffer {
    /// A fresh, empty buffer with the configured size/age triggers.
    pub fn new(max_size: usize, max_age: std::time::Duration) -> Self {
        Self {
            messages: Vec::with_capacity(max_size),
            oldest: None,
            max_size,
            max_age,
        }
    }

    /// Append a message, starting the age timer if this is the first
    /// message since the buffer was last drained.
    pub fn push(&mut self, message: PendingMessage) {
        if self.messages.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.messages.push(message);
    }

    /// Whether the buffer should fire: size reached `max_size`, or the
    /// oldest buffered message has aged past `max_age`.
    pub fn should_flush(&self) -> bool {
        if self.messages.len() >= self.max_size {
            return true;
        }
        match self.oldest {
            Some(t) => t.elapsed() >= self.max_age,
            None => false,
        }
    }

    /// Whether the buffer currently holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Extract the buffer's contents atomically, resetting it to empty
    /// (spec.md §4.D batch execution step 1: "a fresh one replaces it").
    pub fn drain(&mut self) -> Vec<PendingMessage> {
        self.oldest = None;
        std::mem::take(&mut self.messages)
    }

    /// How long until the buffer should next be checked for an age-based
    /// flush, for use as a `tokio::time::sleep` deadline.
    pub fn next_deadline(&self) -> Option<std::time::Duration> {
        self.oldest.map(|t| {
            let elapsed = t.elapsed();
            self.max_age.saturating_sub(elapsed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn decode_accepts_array_vector() {
        let payload = serde_json::json!({
            "requestId": "r1",
            "subjectId": "s1",
            "vector": vec![0.0; FEATURE_DIM],
        })
        .to_string();
        match decode_message(payload.as_bytes(), 1) {
            DecodeOutcome::Accepted(msg) => {
                assert_eq!(msg.request_id, "r1");
                assert_eq!(msg.vector.len(), FEATURE_DIM);
            }
            DecodeOutcome::Rejected { .. } => panic!("expected accept"),
        }
    }

    #[test]
    fn decode_accepts_flat_feature_fields() {
        let mut obj = serde_json::Map::new();
        obj.insert("requestId".into(), serde_json::json!("r2"));
        obj.insert("subjectId".into(), serde_json::json!("s2"));
        for i in 1..=FEATURE_DIM {
            obj.insert(format!("feature_{i}"), serde_json::json!(i as f64));
        }
        let payload = serde_json::Value::Object(obj).to_string();
        match decode_message(payload.as_bytes(), 2) {
            DecodeOutcome::Accepted(msg) => assert_eq!(msg.vector.len(), FEATURE_DIM),
            DecodeOutcome::Rejected { .. } => panic!("expected accept"),
        }
    }

    #[test]
    fn decode_tolerates_double_encoded_json() {
        let inner = serde_json::json!({
            "requestId": "r3",
            "subjectId": "s3",
            "vector": vec![1.0; FEATURE_DIM],
        })
        .to_string();
        let outer = serde_json::Value::String(inner).to_string();
        match decode_message(outer.as_bytes(), 3) {
            DecodeOutcome::Accepted(msg) => assert_eq!(msg.request_id, "r3"),
            DecodeOutcome::Rejected { .. } => panic!("expected accept on double-encoded payload"),
        }
    }

    #[test]
    fn decode_rejects_wrong_dimension_with_message() {
        let payload = serde_json::json!({
            "requestId": "r4",
            "subjectId": "s4",
            "vector": vec![0.0; 34],
        })
        .to_string();
        match decode_message(payload.as_bytes(), 4) {
            DecodeOutcome::Rejected { envelope, delivery_tag } => {
                assert_eq!(delivery_tag, 4);
                assert!(envelope.message.unwrap().contains("dimension"));
            }
            DecodeOutcome::Accepted(_) => panic!("expected reject"),
        }
    }

    #[test]
    fn decode_rejects_missing_vector() {
        let payload = serde_json::json!({"requestId": "r5", "subjectId": "s5"}).to_string();
        match decode_message(payload.as_bytes(), 5) {
            DecodeOutcome::Rejected { .. } => {}
            DecodeOutcome::Accepted(_) => panic!("expected reject"),
        }
    }

    fn msg(tag: u64) -> PendingMessage {
        PendingMessage {
            vector: vec![0.0; FEATURE_DIM],
            subject_id: "s".into(),
            request_id: format!("r{tag}"),
            delivery_tag: tag,
        }
    }

    #[test]
    fn buffer_flushes_at_size() {
        let mut buffer = BatchBuffer::new(2, Duration::from_secs(3600));
        buffer.push(msg(1));
        assert!(!buffer.should_flush());
        buffer.push(msg(2));
        assert!(buffer.should_flush());
        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn buffer_flushes_at_age() {
        let mut buffer = BatchBuffer::new(1000, Duration::from_millis(1));
        buffer.push(msg(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(buffer.should_flush());
    }

    #[test]
    fn buffer_never_exceeds_batch_size_between_drains() {
        let mut buffer = BatchBuffer::new(16, Duration::from_secs(3600));
        for i in 0..16 {
            buffer.push(msg(i));
        }
        assert!(buffer.should_flush());
        let drained = buffer.drain();
        assert_eq!(drained.len(), 16);
    }
}
