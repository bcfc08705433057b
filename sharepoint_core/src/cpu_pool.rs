//! Dedicated rayon pool for document parsing so large PDFs and workbooks never
//! stall the async runtime.

use crate::error::ConnectorError;
use once_cell::sync::Lazy;
use rayon::ThreadPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

static POOL_SIZE: Lazy<usize> = Lazy::new(|| {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(4)
        .clamp(2, 8)
});

static CPU_POOL: Lazy<Option<ThreadPool>> = Lazy::new(|| {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(*POOL_SIZE)
        .thread_name(|idx| format!("sharepoint-extract-{idx}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!(target: "sharepoint.cpu_pool", "falling back to the global rayon pool: {}", err);
            None
        }
    }
});

static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

/// Runs `job` on the extraction pool and awaits its result.
///
/// Panics inside the job are caught and reported as internal errors.
pub async fn spawn_cpu<F, R>(job: F) -> Result<R, ConnectorError>
where
    F: FnOnce() -> Result<R, ConnectorError> + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let queued = IN_FLIGHT.fetch_add(1, Ordering::Relaxed) + 1;
    if queued > *POOL_SIZE * 2 {
        info!(
            target: "sharepoint.cpu_pool",
            queued,
            threads = *POOL_SIZE,
            "extraction backlog growing"
        );
    } else {
        debug!(target: "sharepoint.cpu_pool", queued, "extraction job queued");
    }

    let start = Instant::now();
    let task = move || {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job))
            .map_err(|payload| {
                let reason = if let Some(msg) = payload.downcast_ref::<&str>() {
                    (*msg).to_string()
                } else if let Some(msg) = payload.downcast_ref::<String>() {
                    msg.clone()
                } else {
                    "unknown panic".to_string()
                };
                ConnectorError::InternalError(format!("extraction job panicked: {}", reason))
            })
            .and_then(|inner| inner);
        let _ = tx.send(result);
        let remaining = IN_FLIGHT.fetch_sub(1, Ordering::Relaxed) - 1;
        let latency_ms = start.elapsed().as_millis() as u64;
        if latency_ms > 500 {
            info!(target: "sharepoint.cpu_pool", remaining, latency_ms, "slow extraction job finished");
        } else {
            debug!(target: "sharepoint.cpu_pool", remaining, latency_ms, "extraction job finished");
        }
    };
    match CPU_POOL.as_ref() {
        Some(pool) => pool.spawn(task),
        None => rayon::spawn(task),
    }

    rx.await
        .map_err(|err| ConnectorError::InternalError(format!("extraction pool dropped the job: {}", err)))?
}

pub fn queue_depth() -> usize {
    IN_FLIGHT.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_jobs_off_the_runtime() {
        let name = spawn_cpu(|| Ok(std::thread::current().name().map(|n| n.to_string())))
            .await
            .unwrap();
        assert!(name.is_some());
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let result: Result<(), _> = spawn_cpu(|| panic!("boom")).await;
        match result {
            Err(ConnectorError::InternalError(msg)) => assert!(msg.contains("boom")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
