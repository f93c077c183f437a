//! Bounded concurrent job runner.

use std::future::Future;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt, stream};
use tokio::time::Instant;

use crate::error::Result;

/// Runs jobs with at most `concurrency` in flight.
///
/// Job `i` belongs to wave `i / concurrency` and does not start before
/// `wave * interval` has elapsed since the run began. The first failing
/// job aborts the run: in-flight jobs are dropped and queued ones never
/// start. Results come back in submission order.
#[derive(Debug, Clone, Copy)]
pub struct WorkQueue {
    concurrency: usize,
    interval: Duration,
}

impl WorkQueue {
    pub fn new(concurrency: usize, interval: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            interval,
        }
    }

    pub async fn run<T, Fut, I>(&self, jobs: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let concurrency = self.concurrency;
        let interval = self.interval;

        let jobs: Vec<_> = jobs
            .into_iter()
            .enumerate()
            .map(|(index, job)| async move {
                let wave = u32::try_from(index / concurrency).unwrap_or(u32::MAX);
                if wave > 0 && !interval.is_zero() {
                    tokio::time::sleep_until(start + interval * wave).await;
                }
                job.await.map(|value| (index, value))
            })
            .collect();
        let mut finished: Vec<(usize, T)> = stream::iter(jobs)
            .buffer_unordered(concurrency)
            .try_collect()
            .await?;

        finished.sort_by_key(|(index, _)| *index);
        Ok(finished.into_iter().map(|(_, value)| value).collect())
    }
}
