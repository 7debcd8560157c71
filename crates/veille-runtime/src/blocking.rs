//! Running blocking store calls from async code.

use std::sync::Arc;

use veille_core::{Error, Result};
use veille_store::Store;

/// Run `f` against the store on the blocking pool.
///
/// Once started the closure runs to completion even if the awaiting task is
/// dropped.
pub(crate) async fn run_blocking<S, T, F>(store: &Arc<S>, f: F) -> Result<T>
where
    S: Store,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| Error::Internal(format!("blocking store task failed: {}", e)))?
}
