//! What the resolver needs to know about one kind of consensus question.

use std::fmt;

use serde::Serialize;

use veille_oracle::DecodeError;

use crate::prompt::PromptVariant;

/// The three oracle calls of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    First,
    Second,
    Arbitration,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::First => "first",
            Stage::Second => "second",
            Stage::Arbitration => "arbitration",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A question resolved by two independent answers plus arbitration.
pub trait ConsensusTask: Send + Sync {
    type Output: Clone + fmt::Debug + Serialize + Send + Sync;

    /// Short identifier used in logs and diagnostics file names.
    fn label(&self) -> String;

    fn prompt(&self, variant: PromptVariant) -> String;

    fn arbitration_prompt(&self, first: &Self::Output, second: &Self::Output) -> String;

    fn decode(&self, raw: &str) -> Result<Self::Output, DecodeError>;

    /// Whether two answers count as the same answer.
    fn agrees(&self, first: &Self::Output, second: &Self::Output) -> bool;
}

/// One oracle call as seen by an [`ExchangeSink`].
#[derive(Debug)]
pub struct Exchange<'a> {
    pub label: &'a str,
    pub stage: Stage,
    pub prompt: &'a str,
    /// Decoded answer, or the error message of the failed call.
    pub outcome: Result<serde_json::Value, String>,
}

/// Receives every oracle exchange made by a resolver.
pub trait ExchangeSink: Send + Sync {
    fn record(&self, exchange: &Exchange<'_>);
}
