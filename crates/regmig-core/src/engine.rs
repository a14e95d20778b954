//! Bounded-concurrency job engine.
//!
//! The engine knows nothing about registries: it runs a list of [`Job`]s,
//! each through `pre`, `migrate` and `post` in order, with at most
//! `concurrency` jobs admitted at once. Every job level of the migration
//! hierarchy reuses the same engine with its own job type and limit.

use crate::error::{JobErrors, JobFailure, JobStep, MigrateError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info_span, warn, Instrument};

/// Per-run context threaded explicitly through every job level
#[derive(Clone, Debug)]
pub struct RunContext {
    trace_id: Arc<str>,
    job_id: Option<String>,
    cancel: CancellationToken,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Create a root context with a fresh trace id
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Create a root context driven by an existing cancellation token
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            trace_id: Arc::from(uuid::Uuid::new_v4().to_string()),
            job_id: None,
            cancel,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Derive the context for one job: same trace and token, fresh job id
    pub fn child(&self) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            trace_id: Arc::clone(&self.trace_id),
            job_id: Some(id[..12].to_string()),
            cancel: self.cancel.clone(),
        }
    }

    /// Request early termination of every job sharing this context's token
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Fail with `Cancelled` once cancellation has been requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(MigrateError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A unit of work with a three-phase lifecycle
#[async_trait]
pub trait Job: Send + Sync {
    /// Human-readable identity for logs and errors
    fn info(&self) -> String;

    /// Preparation, e.g. fetching destination metadata
    async fn pre(&self, _ctx: &RunContext) -> Result<()> {
        Ok(())
    }

    /// The actual work, typically fanning out into a nested engine run
    async fn migrate(&self, ctx: &RunContext) -> Result<()>;

    /// Best-effort finalization
    async fn post(&self, _ctx: &RunContext) -> Result<()> {
        Ok(())
    }
}

/// Resolve a configured concurrency, using the host's parallelism for 0
pub fn effective_concurrency(concurrency: usize) -> usize {
    if concurrency > 0 {
        concurrency
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Generic bounded-concurrency executor
pub struct Engine;

impl Engine {
    /// Run every job with at most `concurrency` in flight.
    ///
    /// A failing `pre` or `migrate` skips the rest of that job only; `post`
    /// failures are logged and dropped. All failures are joined into one
    /// [`MigrateError::Jobs`]; `Ok(())` means every job got through `migrate`.
    pub async fn execute(
        ctx: &RunContext,
        concurrency: usize,
        jobs: Vec<Box<dyn Job>>,
    ) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let limit = effective_concurrency(concurrency);
        let semaphore = Arc::new(Semaphore::new(limit));
        debug!(jobs = jobs.len(), concurrency = limit, "Starting engine run");

        let mut handles = Vec::with_capacity(jobs.len());
        for (index, job) in jobs.into_iter().enumerate() {
            let info = job.info();
            let job_ctx = ctx.child();
            let semaphore = Arc::clone(&semaphore);
            let span = info_span!(
                "job",
                trace_id = %job_ctx.trace_id(),
                job_id = job_ctx.job_id().unwrap_or_default(),
                job = %info,
            );

            let handle = tokio::spawn(
                async move {
                    let _permit = tokio::select! {
                        _ = job_ctx.cancelled() => {
                            return Err((JobStep::Pre, MigrateError::Cancelled));
                        }
                        permit = semaphore.acquire_owned() => permit.map_err(|e| {
                            (JobStep::Task, MigrateError::Other(format!("engine closed: {}", e)))
                        })?,
                    };
                    run_job(job.as_ref(), &job_ctx).await
                }
                .instrument(span),
            );
            handles.push((index, info, handle));
        }

        let mut failures = Vec::new();
        for (index, info, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err((
                    JobStep::Task,
                    MigrateError::Other(format!("job task aborted: {}", e)),
                )),
            };
            if let Err((step, error)) = outcome {
                if !error.is_cancelled() {
                    warn!(job = %info, step = %step, error = %error, "Job failed");
                }
                failures.push(JobFailure {
                    index,
                    info,
                    step,
                    error,
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MigrateError::Jobs(JobErrors { failures }))
        }
    }
}

async fn run_job(
    job: &dyn Job,
    ctx: &RunContext,
) -> std::result::Result<(), (JobStep, MigrateError)> {
    for step in [JobStep::Pre, JobStep::Migrate, JobStep::Post] {
        ctx.check().map_err(|e| (step, e))?;
        debug!(step = %step, "Running job step");
        let result = match step {
            JobStep::Pre => job.pre(ctx).await,
            JobStep::Migrate => job.migrate(ctx).await,
            JobStep::Post => {
                // Finalization is best-effort: log and keep the job successful
                if let Err(e) = job.post(ctx).await {
                    warn!(error = %e, "Post step failed");
                }
                Ok(())
            }
            JobStep::Task => Ok(()),
        };
        result.map_err(|e| (step, e))?;
    }
    Ok(())
}
