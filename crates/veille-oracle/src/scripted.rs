//! Scripted oracle for tests and dry runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::oracle::Oracle;
use crate::types::OracleError;

type Reply = Result<String, OracleError>;

/// An oracle that replays canned answers.
///
/// A prompt containing the needle of a rule gets that rule's reply (first
/// match wins). Otherwise replies are popped from the queue in call order,
/// then the fallback is used. With nothing left, the call fails as transient.
#[derive(Default)]
pub struct ScriptedOracle {
    rules: Mutex<Vec<(String, Reply)>>,
    queue: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Option<Reply>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful answer.
    pub fn push(&self, answer: impl Into<String>) -> &Self {
        self.queue.lock().push_back(Ok(answer.into()));
        self
    }

    /// Queue a failure.
    pub fn push_err(&self, error: OracleError) -> &Self {
        self.queue.lock().push_back(Err(error));
        self
    }

    /// Reply `reply` to every prompt containing `needle`.
    pub fn rule(&self, needle: impl Into<String>, reply: Reply) -> &Self {
        self.rules.lock().push((needle.into(), reply));
        self
    }

    /// Reply used once the queue is empty.
    pub fn fallback(&self, reply: Reply) -> &Self {
        *self.fallback.lock() = Some(reply);
        self
    }

    /// Number of `complete` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    fn next_reply(&self, prompt: &str) -> Reply {
        if let Some((_, reply)) = self
            .rules
            .lock()
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
        {
            return reply.clone();
        }
        if let Some(reply) = self.queue.lock().pop_front() {
            return reply;
        }
        match self.fallback.lock().as_ref() {
            Some(reply) => reply.clone(),
            None => Err(OracleError::Transient("script exhausted".into())),
        }
    }
}

impl Oracle for ScriptedOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        self.next_reply(prompt)
    }
}
