//! The top-level scheduler loop: check for a new dump, download+verify it,
//! run the four entity-class pipelines, mark the version complete, sleep,
//! repeat.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use discog_ledger::{DedupIndex, ProgressLedger};
use discog_objstore::{DumpManifest, ObjectStoreClient};
use discog_types::{Decision, DumpVersion, EntityClass};
use discog_xml::EmittedRecord;
use lapin::Connection;
use log::{error, info, warn};
use miette::Diagnostic;
use thiserror::Error;
use tokio::fs;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ExtractorConfig;
use crate::health::HealthHandle;

#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error("error reading last-completed-version marker")]
    ReadMarker(#[source] std::io::Error),

    #[error("error writing last-completed-version marker")]
    WriteMarker(#[source] std::io::Error),

    #[error(transparent)]
    ObjectStore(#[from] discog_objstore::ObjectStoreError),

    #[error(transparent)]
    Ledger(#[from] discog_ledger::LedgerError),

    #[error(transparent)]
    Dedup(#[from] discog_ledger::DedupError),

    #[error(transparent)]
    Publish(#[from] discog_publish::PublishError),

    #[error("XML pipeline task for entity class {0} panicked or was cancelled")]
    PipelineTaskJoin(EntityClass),

    #[error("entity class {0} has an unconfirmed record; checkpoint held back for retry")]
    PublishStalled(EntityClass),
}

pub struct Scheduler {
    config: Arc<ExtractorConfig>,
    objstore: Arc<ObjectStoreClient>,
    ledger: ProgressLedger,
    dedup: HashMap<EntityClass, DedupIndex>,
    health: HealthHandle,
}

impl Scheduler {
    pub async fn new(config: Arc<ExtractorConfig>, health: HealthHandle) -> Result<Self, SchedulerError> {
        let objstore =
            Arc::new(ObjectStoreClient::new(config.upstream_base_url.clone(), config.retry_policy()));
        let ledger = ProgressLedger::new(config.ledger_dir());

        fs::create_dir_all(config.dedup_dir()).await.map_err(SchedulerError::ReadMarker)?;
        let mut dedup = HashMap::new();
        for class in EntityClass::ALL {
            let path = config.dedup_dir().join(format!("{}.db", class.as_str()));
            dedup.insert(class, DedupIndex::open(path)?);
        }

        Ok(Self { config, objstore, ledger, dedup, health })
    }

    async fn last_completed_version(&self) -> Result<Option<DumpVersion>, SchedulerError> {
        match fs::read_to_string(self.config.last_completed_version_path()).await {
            Ok(contents) => Ok(DumpVersion::parse(contents.trim()).ok()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SchedulerError::ReadMarker(err)),
        }
    }

    async fn record_completed_version(&self, version: DumpVersion) -> Result<(), SchedulerError> {
        let path = self.config.last_completed_version_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(SchedulerError::WriteMarker)?;
        }
        fs::write(&path, version.to_string().as_bytes()).await.map_err(SchedulerError::WriteMarker)
    }

    /// Runs forever until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> miette::Result<()> {
        loop {
            if shutdown.is_cancelled() {
                info!("event=scheduler_shutting_down");
                return Ok(());
            }

            if let Err(err) = self.run_one_cycle(&shutdown).await {
                error!("event=scheduler_cycle_failed error={err}. Will retry next cycle.");
                self.health.record_error(EntityClass::Artist, err.to_string());
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.check_interval()) => {}
                _ = shutdown.cancelled() => {
                    info!("event=scheduler_shutting_down_during_sleep");
                    return Ok(());
                }
            }
        }
    }

    async fn run_one_cycle(&self, shutdown: &CancellationToken) -> Result<(), SchedulerError> {
        let last_completed = self.last_completed_version().await?;
        let latest = self.objstore.latest_version().await?;

        if Some(latest) <= last_completed {
            info!("event=no_new_dump latest={latest} last_completed={last_completed:?}");
            return Ok(());
        }

        info!("event=new_dump_detected version={latest}");
        self.health.set_version(Some(latest.to_string()));

        let manifest = self.objstore.manifest(latest).await?;
        let connection = discog_publish::connect(&self.config.amqp_connection, self.config.retry_policy())
            .await
            .map_err(SchedulerError::Publish)?;
        let connection = Arc::new(connection);

        let mut class_results = Vec::new();
        for class in EntityClass::ALL {
            class_results.push(self.run_class(class, latest, &manifest, connection.clone(), shutdown.clone()));
        }
        let results = futures::future::join_all(class_results).await;

        let mut all_ok = true;
        for (class, result) in EntityClass::ALL.into_iter().zip(results) {
            match result {
                Ok(()) => self.ledger.mark_file_complete(latest, class).await?,
                Err(err) => {
                    all_ok = false;
                    error!("event=class_pipeline_failed class={class} error={err}");
                    self.health.record_error(class, err.to_string());
                }
            }
        }

        if all_ok {
            self.ledger.mark_version_complete(latest).await?;
            self.record_completed_version(latest).await?;
            info!("event=dump_completed version={latest}");
        } else {
            warn!("event=dump_incomplete version={latest}. Will retry next cycle.");
        }

        Ok(())
    }

    async fn run_class(
        &self,
        class: EntityClass,
        version: DumpVersion,
        manifest: &DumpManifest,
        connection: Arc<Connection>,
        shutdown: CancellationToken,
    ) -> Result<(), SchedulerError> {
        let cursor = self.ledger.load(version, class).await?;
        if cursor.as_ref().is_some_and(|c| c.terminal) {
            info!("event=file_already_complete class={class} version={version}");
            return Ok(());
        }
        let resume_from_idx = cursor.map(|c| c.idx).unwrap_or(0);

        let descriptor = manifest.file_for(class);
        let source = self.objstore.fetch(descriptor).await?;

        let worker = discog_publish::PublishWorker::open(
            &connection,
            class,
            self.config.publish_confirm_window,
            self.config.retry_policy(),
        )
        .await?;

        let dedup_for_lookup = self.dedup[&class].clone();
        let dedup_for_confirm = self.dedup[&class].clone();
        let health_for_progress = self.health.clone();
        let progress_interval = self.config.checkpoint_every_records;
        let (tx, mut rx) = mpsc::channel::<EmittedRecord>(self.config.channel_capacity);

        let parse_shutdown = shutdown.clone();
        let parse_handle = tokio::spawn(async move {
            tokio::select! {
                outcome = discog_xml::run(
                    class,
                    source,
                    resume_from_idx,
                    progress_interval,
                    tx,
                    move |class, entity_id, hash| match dedup_for_lookup.seen(class, entity_id, hash) {
                        Ok(true) => Decision::Drop,
                        Ok(false) => Decision::Publish,
                        Err(err) => {
                            warn!("event=dedup_lookup_failed class={class} id={entity_id} error={err}. Publishing to be safe.");
                            Decision::Publish
                        }
                    },
                    move |_offset, idx| {
                        health_for_progress.set_progress(class, idx as f64);
                    },
                ) => outcome,
                _ = parse_shutdown.cancelled() => {
                    info!("event=parse_cancelled class={class}");
                    Err(discog_xml::XmlError::Io(std::io::Error::new(std::io::ErrorKind::Interrupted, "shutdown requested")))
                }
            }
        });

        let checkpoint_interval = self.config.checkpoint_interval();
        let checkpoint_every_records = self.config.checkpoint_every_records;
        let ledger = self.ledger.clone();
        let mut total_confirmed: u64 = 0;
        let mut confirmed_since_checkpoint: u64 = 0;
        let mut last_checkpoint_at = Instant::now();
        // Once a publish exhausts its retries, the ledger checkpoint must
        // stop at that record's position so it gets re-emitted next run.
        let mut stalled_at: Option<(u64, u64)> = None;

        while let Some(emitted) = rx.recv().await {
            match worker.publish(version, &emitted.record).await {
                Ok(()) => {
                    if let Err(err) = dedup_for_confirm.update(class, emitted.record.entity_id, emitted.record.content_hash) {
                        error!("event=dedup_update_failed class={class} error={err}");
                        return Err(SchedulerError::Dedup(err));
                    }
                    total_confirmed += 1;
                    confirmed_since_checkpoint += 1;

                    // A record past the first stall confirmed fine on its
                    // own, but the watermark can't skip over the stalled
                    // one, so checkpointing stays suppressed until a future
                    // run re-publishes it successfully.
                    let due = stalled_at.is_none()
                        && (confirmed_since_checkpoint >= checkpoint_every_records
                            || last_checkpoint_at.elapsed() >= checkpoint_interval);
                    if due {
                        dedup_for_confirm.flush()?;
                        ledger.checkpoint(version, class, emitted.offset, total_confirmed, emitted.idx).await?;
                        confirmed_since_checkpoint = 0;
                        last_checkpoint_at = Instant::now();
                    }
                }
                Err(err) => {
                    // The broker nacked every retry attempt; the file is not
                    // aborted, later records still get attempted, but this
                    // is now the earliest unconfirmed record and the
                    // watermark must stop here.
                    warn!(
                        "event=publish_exhausted_retries class={class} entity_id={} error={err}",
                        emitted.record.entity_id
                    );
                    if stalled_at.is_none() {
                        stalled_at = Some((emitted.offset, emitted.idx));
                    }
                }
            }
        }

        if confirmed_since_checkpoint > 0 {
            dedup_for_confirm.flush()?;
        }

        let outcome = parse_handle.await.map_err(|_| SchedulerError::PipelineTaskJoin(class))?;
        let outcome = outcome.map_err(|err| {
            error!("event=parse_failed class={class} error={err}");
            SchedulerError::PipelineTaskJoin(class)
        })?;

        match stalled_at {
            Some((offset, idx)) => {
                ledger.checkpoint(version, class, offset, total_confirmed, idx).await?;
                warn!(
                    "event=file_watermark_pinned class={class} idx={idx} offset={offset}. Will retry unconfirmed record next run."
                );
                Err(SchedulerError::PublishStalled(class))
            }
            None => {
                ledger.checkpoint(version, class, outcome.final_offset, total_confirmed, outcome.final_idx).await?;
                info!(
                    "event=class_done class={class} published={} dropped={} malformed={} skipped_resume={}",
                    outcome.stats.published,
                    outcome.stats.dropped,
                    outcome.stats.malformed,
                    outcome.stats.skipped_resume
                );
                Ok(())
            }
        }
    }
}
