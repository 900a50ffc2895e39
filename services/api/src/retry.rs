//! services/api/src/retry.rs
//!
//! Bounded exponential backoff for transient failures from external
//! collaborators (blob store, OCR, synthesis). Permanent errors short-circuit.

use readalong_core::ports::{PortError, PortResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Maximum attempts per call: one initial try plus two retries.
pub const MAX_ATTEMPTS: u32 = 3;

const BASE_DELAY_MS: u64 = 250;

/// Runs `op` until it succeeds, fails permanently, or exhausts the retry
/// budget. Delays double per attempt: 250ms, 500ms.
pub async fn with_backoff<T, F, Fut>(label: &str, mut op: F) -> PortResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PortResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                let delay = Duration::from_millis(BASE_DELAY_MS << (attempt - 1));
                warn!(
                    "{} failed transiently (attempt {}/{}), retrying in {:?}: {}",
                    label, attempt, MAX_ATTEMPTS, delay, err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
