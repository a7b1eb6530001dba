//! Background jobs: variant generation and remote image fetches.
//!
//! Handlers stay bounded by pushing long-running work onto an in-process
//! queue drained by a single worker task. Delivery is at-least-once: a job
//! that fails is retried on its kind's back-off schedule and logged once the
//! tries are exhausted.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::upload::UploadStatus;
use crate::services::resolver::{basename, Resolver};
use crate::services::upload_service::UploadService;
use crate::services::variant_service::VariantService;

const JOB_TRIES: u32 = 3;

/// Work items accepted by the queue.
#[derive(Debug, Clone)]
pub enum Job {
    /// Produce the resized variants of a completed upload.
    GenerateVariants { upload_id: Uuid },
    /// Download a remote image, ingest it through the upload engine and
    /// attach the result to the product.
    FetchRemoteImage { product_id: Uuid, source: String },
}

impl Job {
    fn describe(&self) -> String {
        match self {
            Job::GenerateVariants { upload_id } => format!("generate_variants({upload_id})"),
            Job::FetchRemoteImage { product_id, source } => {
                format!("fetch_remote_image({product_id}, {source})")
            }
        }
    }

    /// Seconds to wait before the given retry attempt (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        match self {
            // Linear 30s, doubling with the attempt count.
            Job::GenerateVariants { .. } => Duration::from_secs(30 * u64::from(attempt)),
            Job::FetchRemoteImage { .. } => {
                let schedule = [60, 300, 900];
                let idx = (attempt as usize).saturating_sub(1).min(schedule.len() - 1);
                Duration::from_secs(schedule[idx])
            }
        }
    }
}

/// Cloneable handle for enqueuing jobs.
#[derive(Clone, Debug)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    pub fn enqueue(&self, job: Job) {
        if let Err(err) = self.tx.send(job) {
            warn!("job queue closed, dropping job: {}", err.0.describe());
        }
    }
}

/// Create the queue handle and its receiving end.
pub fn queue() -> (JobQueue, mpsc::UnboundedReceiver<Job>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (JobQueue { tx }, rx)
}

/// Drains the queue. Runs until the sending side is dropped.
pub struct JobWorker {
    uploads: UploadService,
    variants: VariantService,
    resolver: Resolver,
    http: reqwest::Client,
}

impl JobWorker {
    pub fn new(uploads: UploadService, variants: VariantService, resolver: Resolver) -> Self {
        Self {
            uploads,
            variants,
            resolver,
            http: reqwest::Client::new(),
        }
    }

    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<Job>) {
        info!("background job worker started");
        while let Some(job) = rx.recv().await {
            self.run_with_retries(job).await;
        }
        info!("background job worker stopped");
    }

    async fn run_with_retries(&self, job: Job) {
        for attempt in 1..=JOB_TRIES {
            match self.execute(&job).await {
                Ok(()) => return,
                Err(err) if attempt < JOB_TRIES => {
                    let delay = job.backoff(attempt);
                    warn!(
                        job = %job.describe(),
                        attempt,
                        error = %err,
                        "job failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(job = %job.describe(), error = %err, "job failed permanently");
                }
            }
        }
    }

    async fn execute(&self, job: &Job) -> anyhow::Result<()> {
        match job {
            Job::GenerateVariants { upload_id } => self.generate_variants(*upload_id).await,
            Job::FetchRemoteImage { product_id, source } => {
                self.fetch_remote_image(*product_id, source).await
            }
        }
    }

    async fn generate_variants(&self, upload_id: Uuid) -> anyhow::Result<()> {
        let upload = self.uploads.fetch_upload(upload_id).await?;
        if upload.status != UploadStatus::Completed {
            anyhow::bail!(
                "upload {} is {} rather than completed",
                upload_id,
                upload.status.as_str()
            );
        }
        let images = self.variants.generate(&upload).await?;
        info!(upload_id = %upload_id, count = images.len(), "variants generated");
        Ok(())
    }

    async fn fetch_remote_image(&self, product_id: Uuid, source: &str) -> anyhow::Result<()> {
        if !source.starts_with("http://") && !source.starts_with("https://") {
            anyhow::bail!("unsupported source scheme: {}", source);
        }

        let response = self.http.get(source).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let image_id = self
            .resolver
            .ingest_and_attach(product_id, basename(source), &bytes)
            .await?;
        info!(product_id = %product_id, image_id = %image_id, "remote image ingested and attached");
        Ok(())
    }
}
