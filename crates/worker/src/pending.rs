//! Pending-call bookkeeping
//!
//! Outstanding calls are keyed by procedure, then by signature. Removing a
//! call from the table is what grants the right to settle it: whoever holds
//! the [`PendingCall`] owns its one-shot reply sender, so a call can be
//! settled once at most.

use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use wampline_common::error::Result;

/// Ceiling on concurrently pending calls per procedure
pub const MAX_CALLS_ALLOWED: usize = 100;

/// Attempts made to find a free signature before giving up
pub const MAX_GENERATE_ATTEMPTS: usize = 10_000;

/// Upper bound (inclusive) of the random part of a signature
const NONCE_CEILING: u32 = 10_000;

/// Outcome delivered to the caller
pub type CallOutcome = Result<Value>;

/// One in-flight call
#[derive(Debug)]
pub struct PendingCall {
    procedure: String,
    signature: String,
    reply: oneshot::Sender<CallOutcome>,
    timeout: Option<AbortHandle>,
}

impl PendingCall {
    pub fn new(
        procedure: impl Into<String>,
        signature: impl Into<String>,
        reply: oneshot::Sender<CallOutcome>,
        timeout: Option<AbortHandle>,
    ) -> Self {
        Self {
            procedure: procedure.into(),
            signature: signature.into(),
            reply,
            timeout,
        }
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Cancel the timeout and deliver `outcome`.
    ///
    /// Returns false when the caller already stopped waiting.
    pub fn settle(self, outcome: CallOutcome) -> bool {
        if let Some(timeout) = &self.timeout {
            timeout.abort();
        }
        self.reply.send(outcome).is_ok()
    }

    /// Drop the call without notifying anyone
    pub fn cancel(self) {
        if let Some(timeout) = &self.timeout {
            timeout.abort();
        }
    }
}

/// Outstanding calls of one client
#[derive(Debug, Default)]
pub struct PendingCallTable {
    calls: HashMap<String, HashMap<String, PendingCall>>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending calls for `procedure`
    pub fn pending_for(&self, procedure: &str) -> usize {
        self.calls.get(procedure).map(HashMap::len).unwrap_or(0)
    }

    /// Number of pending calls across all procedures
    pub fn len(&self) -> usize {
        self.calls.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn contains(&self, procedure: &str, signature: &str) -> bool {
        self.calls
            .get(procedure)
            .map(|calls| calls.contains_key(signature))
            .unwrap_or(false)
    }

    /// Find a signature not used by any pending call of `procedure`.
    ///
    /// Draws at most [`MAX_GENERATE_ATTEMPTS`] candidates, usually from
    /// [`signature_candidate`].
    pub fn generate_signature<F>(&self, procedure: &str, mut candidate: F) -> Option<String>
    where
        F: FnMut() -> String,
    {
        (0..MAX_GENERATE_ATTEMPTS)
            .map(|_| candidate())
            .find(|signature| !self.contains(procedure, signature))
    }

    /// Record a call.
    ///
    /// The signature must come from [`generate_signature`](Self::generate_signature)
    /// under the same lock, so it cannot collide.
    pub fn insert(&mut self, call: PendingCall) {
        let calls = self.calls.entry(call.procedure.clone()).or_default();
        debug_assert!(!calls.contains_key(&call.signature));
        calls.insert(call.signature.clone(), call);
    }

    /// Remove and return the call for `(procedure, signature)`
    pub fn take(&mut self, procedure: &str, signature: &str) -> Option<PendingCall> {
        let calls = self.calls.get_mut(procedure)?;
        let call = calls.remove(signature);
        if calls.is_empty() {
            self.calls.remove(procedure);
        }
        call
    }

    /// Remove every pending call
    pub fn drain(&mut self) -> Vec<PendingCall> {
        self.calls
            .drain()
            .flat_map(|(_, calls)| calls.into_values())
            .collect()
    }
}

/// `{unix millis}_{random 1..=10000}`
pub fn signature_candidate() -> String {
    let nonce = rand::thread_rng().gen_range(1..=NONCE_CEILING);
    format!("{}_{}", Utc::now().timestamp_millis(), nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wampline_common::WampError;

    fn call(procedure: &str, signature: &str) -> (PendingCall, oneshot::Receiver<CallOutcome>) {
        let (tx, rx) = oneshot::channel();
        (PendingCall::new(procedure, signature, tx, None), rx)
    }

    #[test]
    fn test_signature_format() {
        let signature = signature_candidate();
        let (millis, nonce) = signature.split_once('_').unwrap();
        assert!(millis.parse::<i64>().unwrap() > 0);

        let nonce: u32 = nonce.parse().unwrap();
        assert!((1..=NONCE_CEILING).contains(&nonce));
    }

    #[test]
    fn test_generate_skips_taken_signatures() {
        let mut table = PendingCallTable::new();
        table.insert(call("status", "1_1").0);

        let mut candidates = vec!["1_2", "1_1"];
        let signature = table
            .generate_signature("status", || candidates.pop().unwrap().to_string())
            .unwrap();
        assert_eq!(signature, "1_2");
    }

    #[test]
    fn test_generate_exhausted() {
        let mut table = PendingCallTable::new();
        table.insert(call("status", "1_1").0);

        let mut attempts = 0;
        let signature = table.generate_signature("status", || {
            attempts += 1;
            "1_1".to_string()
        });
        assert!(signature.is_none());
        assert_eq!(attempts, MAX_GENERATE_ATTEMPTS);

        // other procedures are unaffected
        assert!(table
            .generate_signature("blocks", || "1_1".to_string())
            .is_some());
    }

    #[test]
    fn test_take_prunes_empty_procedures() {
        let mut table = PendingCallTable::new();
        table.insert(call("status", "1_1").0);
        table.insert(call("status", "1_2").0);
        table.insert(call("blocks", "1_1").0);
        assert_eq!(table.pending_for("status"), 2);
        assert_eq!(table.len(), 3);

        assert!(table.take("status", "1_1").is_some());
        assert!(table.take("status", "1_1").is_none());
        assert!(table.take("blocks", "1_1").is_some());
        assert!(table.take("missing", "1_1").is_none());

        assert_eq!(table.pending_for("blocks"), 0);
        assert_eq!(table.len(), 1);
        assert!(!table.is_empty());
    }

    #[tokio::test]
    async fn test_drain_empties_table() {
        let mut table = PendingCallTable::new();
        let (first, first_rx) = call("status", "1_1");
        table.insert(first);
        table.insert(call("blocks", "1_1").0);

        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);

        drop(drained);
        assert!(first_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_settle_delivers_once() {
        let (pending, rx) = call("status", "1_1");
        assert!(pending.settle(Ok(json!(5))));
        assert_eq!(rx.await.unwrap().unwrap(), json!(5));

        let (pending, rx) = call("status", "1_2");
        drop(rx);
        assert!(!pending.settle(Err(WampError::timeout("late"))));
    }

    #[tokio::test]
    async fn test_settle_aborts_timeout() {
        let timer = tokio::spawn(std::future::pending::<()>());
        let (tx, _rx) = oneshot::channel();
        let pending = PendingCall::new("status", "1_1", tx, Some(timer.abort_handle()));

        pending.settle(Ok(json!(null)));
        assert!(timer.await.unwrap_err().is_cancelled());
    }
}
