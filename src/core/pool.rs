use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::debug;

use super::aggregate::{SimulationOptions, run_simulation_with_cancel};
use super::error::SimulationError;
use super::types::{HouseholdProfile, SimulationResult};

/// Shared flag that abandons the unscheduled trials of a batch.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Dedicated rayon pool for simulation batches, so trials never run on the
/// async executor's threads.
#[derive(Clone)]
pub struct SimulationPool {
    pool: Arc<rayon::ThreadPool>,
}

impl SimulationPool {
    /// `threads == None` sizes the pool to the machine.
    pub fn new(threads: Option<usize>) -> Result<Self, rayon::ThreadPoolBuildError> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("firesim-{i}"));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads.max(1));
        }
        Ok(Self {
            pool: Arc::new(builder.build()?),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn submit(&self, profile: HouseholdProfile, options: SimulationOptions) -> SimulationHandle {
        self.submit_with_token(profile, options, CancellationToken::new())
    }

    pub fn submit_with_token(
        &self,
        profile: HouseholdProfile,
        options: SimulationOptions,
        cancel: CancellationToken,
    ) -> SimulationHandle {
        let (tx, rx) = oneshot::channel();
        let token = cancel.clone();
        self.pool.spawn(move || {
            let result = run_simulation_with_cancel(&profile, &options, &token);
            if tx.send(result).is_err() {
                debug!("simulation finished after its handle was dropped");
            }
        });
        SimulationHandle { rx, cancel }
    }
}

/// Resolves to the batch result once every trial has run.
pub struct SimulationHandle {
    rx: oneshot::Receiver<Result<SimulationResult, SimulationError>>,
    cancel: CancellationToken,
}

impl SimulationHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Future for SimulationHandle {
    type Output = Result<SimulationResult, SimulationError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SimulationError::WorkerLost)),
            Poll::Pending => Poll::Pending,
        }
    }
}
