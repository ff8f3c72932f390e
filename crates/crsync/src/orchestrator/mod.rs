//! Sync executor - main workflow coordinator.
//!
//! One run walks the phases of [`PhaseTracker`]: validation, schema sync,
//! batched data sync and the optional delete pass. Schema changes are made
//! outside any data transaction; each data batch runs in its own target
//! transaction when enabled.

mod report;

pub use report::SyncReport;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, SyncOptions};
use crate::core::traits::Repository;
use crate::drivers::SqliteRepository;
use crate::error::{Result, SyncError};
use crate::plan::{ChangeSetPlanner, ObjectChange};
use crate::rule::{ExpressionParser, RuleFilter, RuleParser};
use crate::schema::{MigrationOptions, MigrationPlan, SchemaCatalog, SchemaDiff, SchemaMigrator};
use crate::state::{PhaseTracker, RunStatus, SyncMode, SyncPhase};
use crate::transfer::{AttributeCopier, CopyStats};

/// Connectivity and size of both repositories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub source: String,
    pub target: String,
    pub source_objects: i64,
    pub target_objects: i64,
    pub source_last_update: i64,
    pub target_last_update: i64,
}

/// Runs synchronization from a source repository into a target repository.
pub struct SyncExecutor {
    source: Arc<dyn Repository>,
    target: Arc<dyn Repository>,
    options: SyncOptions,
    rule: RuleFilter,
    config_hash: String,
    cancel: CancellationToken,
}

impl SyncExecutor {
    /// Create an executor over two open repositories. The rule in `options`
    /// is not parsed; use [`SyncExecutor::with_rule_parser`] or
    /// [`SyncExecutor::with_rule`].
    pub fn new(
        source: Arc<dyn Repository>,
        target: Arc<dyn Repository>,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            target,
            options,
            rule: RuleFilter::match_all(),
            config_hash: String::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Connect both repositories from a configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let source = SqliteRepository::connect(&config.source).await?;
        let target = SqliteRepository::connect(&config.target).await?;

        Self::new(Arc::new(source), Arc::new(target), config.sync.clone())
            .with_config_hash(config.hash())
            .with_rule_parser(&ExpressionParser::new())
    }

    /// Parse the configured rule with `parser`.
    pub fn with_rule_parser(mut self, parser: &dyn RuleParser) -> Result<Self> {
        self.rule = RuleFilter::parse(self.options.effective_rule(), parser)?;
        Ok(self)
    }

    /// Use an already built rule filter.
    pub fn with_rule(mut self, rule: RuleFilter) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Stop the run at the next batch boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn source(&self) -> &dyn Repository {
        self.source.as_ref()
    }

    pub fn target(&self) -> &dyn Repository {
        self.target.as_ref()
    }

    /// Check both repositories are reachable and report their sizes.
    pub async fn health_check(&self) -> Result<HealthReport> {
        Ok(HealthReport {
            source: self.source.name().to_string(),
            target: self.target.name().to_string(),
            source_objects: self.source.count_objects().await?,
            target_objects: self.target.count_objects().await?,
            source_last_update: self.source.last_update().await?,
            target_last_update: self.target.last_update().await?,
        })
    }

    /// Schema differences between source and target, without changing anything.
    pub async fn diff(&self) -> Result<SchemaDiff> {
        let source = SchemaCatalog::load(self.source.as_ref()).await?;
        let target = SchemaCatalog::load(self.target.as_ref()).await?;
        Ok(SchemaDiff::between(&source, &target))
    }

    /// Schema migration a run would perform, validated against the options.
    pub async fn plan_schema(&self) -> Result<MigrationPlan> {
        let source = SchemaCatalog::load(self.source.as_ref()).await?;
        let target = SchemaCatalog::load(self.target.as_ref()).await?;
        self.migrator().plan(&source, &target)
    }

    fn migrator(&self) -> SchemaMigrator {
        SchemaMigrator::new(MigrationOptions {
            allow_alter_table: self.options.allow_alter_table,
            ignore_optimized: self.options.ignore_optimized,
        })
    }

    /// Run one synchronization.
    ///
    /// On failure the error is [`SyncError::Failed`], carrying the failed
    /// phase and the partial report.
    pub async fn run(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::new(
            self.source.name(),
            self.target.name(),
            self.options.test,
            self.config_hash.clone(),
        );
        let mut tracker = PhaseTracker::new();

        info!(
            "Starting sync run {}: {} -> {}{}",
            report.run_id,
            self.source.name(),
            self.target.name(),
            if self.options.test { " (test mode)" } else { "" }
        );

        let outcome = self.run_phases(&mut tracker, &mut report).await;
        match outcome {
            Ok(()) => {
                report.phases = tracker.history().to_vec();
                report.finish(RunStatus::Completed, started.elapsed());
                info!("{}", report.message());
                Ok(report)
            }
            Err(e) => {
                self.abort_transactions().await;
                let phase = tracker.fail();
                let status = if matches!(e, SyncError::Cancelled) {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                report.error = Some(e.to_string());
                report.phases = tracker.history().to_vec();
                report.finish(status, started.elapsed());
                warn!("Sync run {} failed during {}: {}", report.run_id, phase, e);
                Err(SyncError::Failed {
                    phase,
                    report: Box::new(report),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn run_phases(&self, tracker: &mut PhaseTracker, report: &mut SyncReport) -> Result<()> {
        let source = self.source.as_ref();
        let target = self.target.as_ref();
        let options = &self.options;

        // Phase 1: validate
        tracker.advance(SyncPhase::Validating)?;
        info!("Phase 1: Validating repositories");
        let source_objects = source.count_objects().await?;
        if source_objects == 0 && !options.allow_empty {
            return Err(SyncError::EmptySourceNotAllowed(source.name().to_string()));
        }
        let target_objects = target.count_objects().await?;
        let source_last_update = source.last_update().await?;
        let target_last_update = target.last_update().await?;
        debug!(
            "{}: {} objects, last update {}; {}: {} objects, last update {}",
            source.name(),
            source_objects,
            source_last_update,
            target.name(),
            target_objects,
            target_last_update
        );

        if options.source_transaction {
            source.begin().await?;
        }

        // Phase 2: schema
        tracker.advance(SyncPhase::SchemaSync)?;
        info!("Phase 2: Reconciling schema");
        let source_catalog = SchemaCatalog::load(source).await?;
        let mut target_catalog = SchemaCatalog::load(target).await?;
        let migrator = self.migrator();
        let plan = migrator.plan(&source_catalog, &target_catalog)?;
        report.schema_steps = plan.steps.iter().map(|s| s.describe()).collect();
        let schema_changed = if plan.is_empty() {
            false
        } else if options.test {
            for step in &report.schema_steps {
                info!("{}: would {}", target.name(), step);
            }
            report.schema = plan.summary();
            false
        } else {
            report.schema = migrator.apply(&plan, &mut target_catalog, target).await?;
            true
        };

        // Phase 3: data
        tracker.advance(SyncPhase::DataSync)?;
        // An empty target holds nothing the watermark could bound.
        let mode = if target_last_update == 0 || target_objects == 0 || schema_changed {
            SyncMode::Full
        } else {
            SyncMode::Incremental
        };
        report.mode = Some(mode);
        info!("Phase 3: Synchronizing data ({:?})", mode);

        let planner =
            ChangeSetPlanner::new(source, target, &source_catalog, &target_catalog, &self.rule);
        let candidates = planner.select_candidates(mode, target_last_update).await?;
        let streaming = options.use_lob_streams
            || options
                .lob_stream_threshold
                .is_some_and(|threshold| candidates.len() >= threshold);
        let planner = planner.with_streaming(streaming);
        let copier = AttributeCopier::new(source, target, &source_catalog, &target_catalog)
            .test_mode(options.test);
        info!(
            "{} candidate objects{}",
            candidates.len(),
            if streaming { ", streaming LOBs" } else { "" }
        );

        let batch_size = options.batch_size.max(1);
        for batch in candidates.chunks(batch_size) {
            self.check_cancelled()?;
            let changes = planner.classify(batch).await?;
            let stats = self.write_batch(&copier, &changes).await?;
            record(report, &stats);
            report.batches += 1;
            debug!(
                "Batch {}: {} inserted, {} updated, {} unchanged",
                report.batches, stats.inserted, stats.updated, stats.unchanged
            );
        }

        // Phase 4: deletions
        if options.delete {
            tracker.advance(SyncPhase::DeletePass)?;
            self.check_cancelled()?;
            info!("Phase 4: Deleting objects not selected in the source");
            let doomed = planner.select_deletions().await?;
            for chunk in doomed.chunks(batch_size) {
                self.check_cancelled()?;
                let deleted = self
                    .in_target_transaction(copier.delete(chunk))
                    .await?;
                report.objects_deleted += deleted;
                report.batches += 1;
            }
        }

        if !options.test && source_last_update > 0 && source_last_update != target_last_update {
            target.set_last_update(source_last_update).await?;
            debug!("{}: last update set to {}", target.name(), source_last_update);
        }

        if options.source_transaction {
            source.commit().await?;
        }

        tracker.advance(SyncPhase::Done)?;
        Ok(())
    }

    async fn write_batch(
        &self,
        copier: &AttributeCopier<'_>,
        changes: &[ObjectChange],
    ) -> Result<CopyStats> {
        self.in_target_transaction(copier.apply(changes)).await
    }

    /// Run `work` inside a target transaction when enabled and writing.
    async fn in_target_transaction<T>(
        &self,
        work: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let transactional = self.options.target_transaction && !self.options.test;
        if !transactional {
            return work.await;
        }

        self.target.begin().await?;
        match work.await {
            Ok(value) => {
                self.target.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.target.rollback().await {
                    warn!("{}: rollback failed: {}", self.target.name(), rollback);
                }
                Err(e)
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!("Cancellation requested, stopping at batch boundary");
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    async fn abort_transactions(&self) {
        for repo in [self.target.as_ref(), self.source.as_ref()] {
            if let Err(e) = repo.rollback().await {
                warn!("{}: rollback failed: {}", repo.name(), e);
            }
        }
    }
}

fn record(report: &mut SyncReport, stats: &CopyStats) {
    report.objects_inserted += stats.inserted;
    report.objects_updated += stats.updated;
    report.objects_unchanged += stats.unchanged;
    report.attributes_written += stats.attributes_written;
    report.values_written += stats.values_written;
    report.lobs_streamed += stats.lobs_streamed;
}

#[cfg(test)]
mod tests;
