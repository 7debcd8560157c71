//! The oracle seam: one prompt in, one raw text answer out.

use std::future::Future;

use crate::types::OracleError;

/// A non-deterministic classifier reachable by prompt.
///
/// Implementations perform exactly one request per call; retries, permits
/// and decoding belong to [`crate::OracleClient`].
pub trait Oracle: Send + Sync + 'static {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String, OracleError>> + Send;
}
