//! Batch concurrency controller.
//!
//! Runs an ordered list of independent units of work under a [`PerformanceProfile`]:
//!
//! - `LowResource`: one unit at a time, throttle delay after each unit.
//! - `Balanced`: fixed-size batches run concurrently, twice the throttle delay between batches.
//! - `HighPerformance`: every unit spawned at once, bounded by the admission gate only.
//!
//! The admission gate is a semaphore of `max_concurrency` slots. Results come back in input
//! order. Failures do not stop units already admitted; [`BatchController::try_run`] reports the
//! first failure once every unit has finished.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::spawn;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::settings::{PerformanceMode, PerformanceProfile};
use crate::signal::CancellationToken;

/// Executes units of work under a performance profile and a cancellation token.
#[derive(Debug, Clone)]
pub struct BatchController {
    profile: PerformanceProfile,
    cancel: CancellationToken,
    gate: Arc<Semaphore>,
}

impl BatchController {
    pub fn new(profile: PerformanceProfile, cancel: CancellationToken) -> Self {
        let gate = Arc::new(Semaphore::new(profile.effective_concurrency()));
        Self {
            profile,
            cancel,
            gate,
        }
    }

    pub fn profile(&self) -> &PerformanceProfile {
        &self.profile
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs `work` on every item and returns one result per item, in input order.
    ///
    /// Units that never start because the token was cancelled report `Error::Cancelled`.
    ///
    /// # Arguments
    ///
    /// * `items` - Inputs, one per unit of work
    /// * `work` - Unit of work, called once per item
    ///
    /// # Returns
    ///
    /// * `Vec<Result<R>>` - Outcome of every unit
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, work: F) -> Vec<Result<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let work = Arc::new(work);
        match self.profile.mode {
            PerformanceMode::LowResource => self.run_sequential(items, work).await,
            PerformanceMode::Balanced => self.run_batched(items, work).await,
            PerformanceMode::HighPerformance => self.run_all(items, work).await,
        }
    }

    /// Like [`run`](Self::run), but fails with the first error (in input order) after every
    /// admitted unit has completed.
    pub async fn try_run<T, R, F, Fut>(&self, items: Vec<T>, work: F) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.run(items, work).await.into_iter().collect()
    }

    async fn run_sequential<T, R, F, Fut>(&self, items: Vec<T>, work: Arc<F>) -> Vec<Result<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            if self.cancel.is_cancelled() {
                results.push(Err(Error::Cancelled));
                continue;
            }
            let outcome = match self.gate.acquire().await {
                Ok(_permit) => work(item).await,
                Err(e) => Err(Error::Semaphore(e)),
            };
            results.push(outcome);

            if let Some(delay) = self.profile.throttle_delay() {
                sleep(delay).await;
            }
        }
        results
    }

    async fn run_batched<T, R, F, Fut>(&self, items: Vec<T>, work: Arc<F>) -> Vec<Result<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let total = items.len();
        let batch_size = self.profile.effective_batch_size();
        let mut results = Vec::with_capacity(total);
        let mut remaining = items.into_iter();

        loop {
            let batch: Vec<T> = remaining.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            let handles = batch
                .into_iter()
                .map(|item| self.spawn_unit(item, Arc::clone(&work)))
                .collect::<Vec<_>>();
            results.extend(Self::collect(handles).await);

            if results.len() < total {
                if let Some(delay) = self.profile.throttle_delay() {
                    sleep(delay * 2).await;
                }
            }
        }
        results
    }

    async fn run_all<T, R, F, Fut>(&self, items: Vec<T>, work: Arc<F>) -> Vec<Result<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let handles = items
            .into_iter()
            .map(|item| self.spawn_unit(item, Arc::clone(&work)))
            .collect::<Vec<_>>();
        Self::collect(handles).await
    }

    fn spawn_unit<T, R, F, Fut>(&self, item: T, work: Arc<F>) -> JoinHandle<Result<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let gate = Arc::clone(&self.gate);
        let cancel = self.cancel.clone();
        spawn(async move {
            let _permit = gate.acquire().await?;
            cancel.check()?;
            work(item).await
        })
    }

    async fn collect<R>(handles: Vec<JoinHandle<Result<R>>>) -> Vec<Result<R>> {
        join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.map_err(Error::Join).and_then(|r| r))
            .collect()
    }
}
