//! The consensus resolver.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use veille_oracle::{Oracle, OracleClient, OracleError};

use crate::prompt::PromptVariant;
use crate::task::{ConsensusTask, Exchange, ExchangeSink, Stage};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsensusError {
    #[error("first call failed: {0}")]
    First(OracleError),

    #[error("second call failed: {0}")]
    Second(OracleError),

    #[error("arbitration failed: {0}")]
    Arbitration(OracleError),
}

impl ConsensusError {
    pub fn stage(&self) -> Stage {
        match self {
            ConsensusError::First(_) => Stage::First,
            ConsensusError::Second(_) => Stage::Second,
            ConsensusError::Arbitration(_) => Stage::Arbitration,
        }
    }

    pub fn oracle_error(&self) -> &OracleError {
        match self {
            ConsensusError::First(e) | ConsensusError::Second(e) | ConsensusError::Arbitration(e) => e,
        }
    }
}

/// Final answer of a resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<T> {
    pub output: T,
    /// Whether the two first answers disagreed and call #3 decided.
    pub arbitrated: bool,
    /// Oracle calls made (2 or 3), not counting retries.
    pub calls: u32,
}

/// Resolves tasks through a shared [`OracleClient`].
///
/// Calls #1 and #2 run concurrently, #2 starting `stagger` after #1; both
/// compete for the client's permits like any other call.
pub struct ConsensusResolver<O> {
    client: Arc<OracleClient<O>>,
    stagger: Duration,
    sink: Option<Arc<dyn ExchangeSink>>,
}

impl<O: Oracle> ConsensusResolver<O> {
    pub fn new(client: Arc<OracleClient<O>>, stagger: Duration) -> Self {
        Self {
            client,
            stagger,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ExchangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn client(&self) -> &Arc<OracleClient<O>> {
        &self.client
    }

    pub async fn resolve<T: ConsensusTask>(
        &self,
        task: &T,
    ) -> Result<Resolution<T::Output>, ConsensusError> {
        let label = task.label();
        let first_prompt = task.prompt(PromptVariant::Primary);
        let second_prompt = task.prompt(PromptVariant::Secondary);

        let first = self.call(task, &label, Stage::First, &first_prompt);
        let second = async {
            if !self.stagger.is_zero() {
                tokio::time::sleep(self.stagger).await;
            }
            self.call(task, &label, Stage::Second, &second_prompt).await
        };
        let (first, second) = tokio::join!(first, second);
        let first = first.map_err(ConsensusError::First)?;
        let second = second.map_err(ConsensusError::Second)?;

        if task.agrees(&first, &second) {
            info!("[{}] Both calls agree", label);
            return Ok(Resolution {
                output: first,
                arbitrated: false,
                calls: 2,
            });
        }

        warn!(
            "[{}] Calls disagree ({:?} vs {:?}), arbitrating",
            label, first, second
        );
        let prompt = task.arbitration_prompt(&first, &second);
        let output = self
            .call(task, &label, Stage::Arbitration, &prompt)
            .await
            .map_err(ConsensusError::Arbitration)?;
        info!("[{}] Arbitration decided {:?}", label, output);

        Ok(Resolution {
            output,
            arbitrated: true,
            calls: 3,
        })
    }

    async fn call<T: ConsensusTask>(
        &self,
        task: &T,
        label: &str,
        stage: Stage,
        prompt: &str,
    ) -> Result<T::Output, OracleError> {
        debug!("[{}] Starting {} call", label, stage);
        let result = self.client.call(prompt, |raw| task.decode(raw)).await;

        if let Some(sink) = &self.sink {
            let outcome = match &result {
                Ok(output) => serde_json::to_value(output).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            sink.record(&Exchange {
                label,
                stage,
                prompt,
                outcome,
            });
        }
        result
    }
}
