//! The matching engine: builds indexes over the reference corpus, searches
//! them with the query hashes and aggregates the neighbors into a
//! [`MatchReport`].
//!
//! Three modes are supported, selected by [`MatchConfig::mode`]:
//!
//! - [`SearchMode::Unbatched`]: one index over the whole corpus.
//! - [`SearchMode::BatchedCombined`]: the corpus is added batch by batch into
//!   one index, which is searched once. Results match the unbatched mode.
//! - [`SearchMode::BatchedSeparate`]: every batch gets its own index, searched
//!   on its own. Keys are qualified with the batch number and batches run
//!   concurrently on a worker pool.
//!
//! Indexes that need training are always trained on batch 0 (or the whole
//! corpus when unbatched), so every per-batch index is calibrated the same way.

pub mod config;

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::batch::{Batch, plan_batches};
use crate::error::{NeardupError, Result};
use crate::index::{IndexFactory, IndexKind, VectorIndex};
use crate::matching::{BatchFailure, ImageMatch, MatchAggregator, MatchReport, entry_key};
use crate::storage::{FileStorage, Storage, StorageConfig};
use crate::vector::{ImageSet, MatrixView};

pub use config::{MatchConfig, SearchMode};

/// Outcome of one batch in the separate-batch mode.
struct BatchOutcome {
    batch: usize,
    entries: Result<Vec<(String, Vec<ImageMatch>)>>,
    persistence_failure: Option<String>,
}

/// Near-duplicate matching engine.
#[derive(Debug)]
pub struct SearchEngine {
    config: MatchConfig,
    kind: IndexKind,
    storage: Option<Arc<dyn Storage>>,
    thread_pool: Arc<ThreadPool>,
}

impl SearchEngine {
    /// Create an engine that persists indexes to `config.index_directory`.
    ///
    /// A directory that cannot be opened is not fatal: the run proceeds and
    /// every index it builds is reported as a persistence failure.
    pub fn new(config: MatchConfig) -> Result<Self> {
        let storage: Option<Arc<dyn Storage>> = if config.persist_indexes {
            match FileStorage::new(&config.index_directory, StorageConfig::default()) {
                Ok(storage) => Some(Arc::new(storage)),
                Err(e) => {
                    warn!(
                        "cannot open index directory {}: {e}",
                        config.index_directory.display()
                    );
                    None
                }
            }
        } else {
            None
        };

        Self::build(config, storage)
    }

    /// Create an engine that persists indexes to `storage`.
    pub fn with_storage(config: MatchConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        Self::build(config, Some(storage))
    }

    fn build(config: MatchConfig, storage: Option<Arc<dyn Storage>>) -> Result<Self> {
        config.validate()?;
        let kind = config.index_kind()?;

        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads())
            .thread_name(|i| format!("neardup-batch-{i}"))
            .build()
            .map_err(|e| NeardupError::index(format!("Failed to create thread pool: {e}")))?;

        Ok(Self {
            config,
            kind,
            storage,
            thread_pool: Arc::new(thread_pool),
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn mode(&self) -> SearchMode {
        self.config.mode()
    }

    /// Find near-duplicates of every query among the references.
    ///
    /// Fails before any index is built when the two sets have different
    /// dimensions. In the separate-batch mode a failing batch is recorded in
    /// the report and the remaining batches still run.
    pub fn run(&self, references: &ImageSet, queries: &ImageSet) -> Result<MatchReport> {
        if !references.is_empty()
            && !queries.is_empty()
            && references.dimension() != queries.dimension()
        {
            return Err(NeardupError::dimension_mismatch(
                references.dimension(),
                queries.dimension(),
            ));
        }

        let deadline = self.config.time_budget.map(|budget| Instant::now() + budget);
        let mode = self.mode();
        info!(
            "matching {} queries against {} references ({mode:?}, {}, k={}, threshold={})",
            queries.len(),
            references.len(),
            self.kind,
            self.config.k_neighbors,
            self.config.similarity_threshold
        );

        let started = Instant::now();
        let report = match mode {
            SearchMode::Unbatched => self.run_unbatched(references, queries)?,
            SearchMode::BatchedCombined => self.run_combined(references, queries, deadline)?,
            SearchMode::BatchedSeparate => self.run_separate(references, queries, deadline)?,
        };

        info!(
            "found {} matches under {} keys in {:?}",
            report.match_count(),
            report.len(),
            started.elapsed()
        );
        Ok(report)
    }

    fn run_unbatched(&self, references: &ImageSet, queries: &ImageSet) -> Result<MatchReport> {
        let mut report = MatchReport::new(SearchMode::Unbatched);
        if references.is_empty() {
            report.extend(empty_entries(queries));
            return Ok(report);
        }

        let corpus = references.view();
        let mut index = self.build_index(references.dimension(), corpus)?;
        index.add(corpus)?;
        self.persist(index.as_ref(), SearchMode::Unbatched.index_file_name(0), &mut report);

        let results = index.search(queries.view(), self.config.k_neighbors)?;
        report.extend(self.aggregator(references).aggregate(queries, &results, None)?);
        Ok(report)
    }

    fn run_combined(
        &self,
        references: &ImageSet,
        queries: &ImageSet,
        deadline: Option<Instant>,
    ) -> Result<MatchReport> {
        let mut report = MatchReport::new(SearchMode::BatchedCombined);
        let batches = plan_batches(references.len(), self.config.batch_size)?;
        let Some(first) = batches.first() else {
            report.extend(empty_entries(queries));
            return Ok(report);
        };

        let corpus = references.view();
        let mut index = self.build_index(references.dimension(), corpus.slice(first.range()))?;
        for batch in &batches {
            check_deadline(deadline, batch.number)?;
            debug!("adding batch {} ({} vectors)", batch.number, batch.len());
            index.add(corpus.slice(batch.range()))?;
        }
        self.persist(index.as_ref(), SearchMode::BatchedCombined.index_file_name(0), &mut report);

        check_deadline(deadline, batches.len())?;
        let results = index.search(queries.view(), self.config.k_neighbors)?;
        report.extend(self.aggregator(references).aggregate(queries, &results, None)?);
        Ok(report)
    }

    fn run_separate(
        &self,
        references: &ImageSet,
        queries: &ImageSet,
        deadline: Option<Instant>,
    ) -> Result<MatchReport> {
        let mut report = MatchReport::new(SearchMode::BatchedSeparate);
        let batches = plan_batches(references.len(), self.config.batch_size)?;
        let Some(first) = batches.first() else {
            return Ok(report);
        };

        let training = references.view().slice(first.range());
        let process = |batch: &Batch| self.process_batch(batch, references, queries, training, deadline);

        // Collecting an indexed parallel iterator keeps batch order.
        let outcomes: Vec<BatchOutcome> = if self.config.worker_threads() == 1 {
            batches.iter().map(process).collect()
        } else {
            self.thread_pool
                .install(|| batches.par_iter().map(process).collect())
        };

        for outcome in outcomes {
            if let Some(name) = outcome.persistence_failure {
                report.persistence_failures.push(name);
            }
            match outcome.entries {
                Ok(entries) => report.extend(entries),
                Err(error) => {
                    warn!("batch {} failed: {error}", outcome.batch);
                    report.failed_batches.push(BatchFailure {
                        batch: outcome.batch,
                        error,
                    });
                }
            }
        }

        Ok(report)
    }

    fn process_batch(
        &self,
        batch: &Batch,
        references: &ImageSet,
        queries: &ImageSet,
        training: MatrixView<'_>,
        deadline: Option<Instant>,
    ) -> BatchOutcome {
        let mut persistence_failure = None;
        let entries = check_deadline(deadline, batch.number).and_then(|()| {
            debug!(
                "searching batch {} (ids {}..{})",
                batch.number, batch.start, batch.end
            );

            let mut index = self.build_index(references.dimension(), training)?;
            index.add(references.view().slice(batch.range()))?;

            let name = SearchMode::BatchedSeparate.index_file_name(batch.number);
            persistence_failure = self.try_persist(index.as_ref(), &name).err().map(|_| name);

            let results = index.search(queries.view(), self.config.k_neighbors)?;
            let entries = self
                .aggregator(references)
                .aggregate(queries, &results, Some(batch))?;
            index.reset();
            Ok(entries)
        });

        BatchOutcome {
            batch: batch.number,
            entries,
            persistence_failure,
        }
    }

    /// A fresh index of the configured kind, trained on `training` when the
    /// kind needs it.
    fn build_index(
        &self,
        dimension: usize,
        training: MatrixView<'_>,
    ) -> Result<Box<dyn VectorIndex>> {
        let metric = self.config.metric;
        let mut index = IndexFactory::create_kind(dimension, self.kind, metric)?;
        if !index.requires_training() {
            return Ok(index);
        }

        match index.train(training) {
            Ok(()) => Ok(index),
            Err(e) if e.is_degenerate_training() && self.config.fallback_to_flat => {
                warn!("{e}; falling back to a flat index");
                IndexFactory::create_kind(dimension, IndexKind::Flat, metric)
            }
            Err(e) => Err(e),
        }
    }

    fn persist(&self, index: &dyn VectorIndex, name: String, report: &mut MatchReport) {
        if self.try_persist(index, &name).is_err() {
            report.persistence_failures.push(name);
        }
    }

    /// Write `index` if persistence is on. Failures are logged and returned
    /// for the report but never abort the run.
    fn try_persist(&self, index: &dyn VectorIndex, name: &str) -> Result<()> {
        if !self.config.persist_indexes {
            return Ok(());
        }

        let result = match &self.storage {
            Some(storage) => index.write(storage.as_ref(), name),
            None => Err(NeardupError::persistence(format!(
                "no storage available for {name}"
            ))),
        };

        if let Err(e) = &result {
            warn!("could not persist {name}: {e}");
        }
        result
    }

    fn aggregator<'a>(&self, references: &'a ImageSet) -> MatchAggregator<'a> {
        MatchAggregator::new(
            references,
            references.dimension(),
            self.config.similarity_threshold,
        )
    }
}

/// One empty entry per query.
fn empty_entries(queries: &ImageSet) -> Vec<(String, Vec<ImageMatch>)> {
    queries
        .names()
        .iter()
        .map(|name| (entry_key(name, None), Vec::new()))
        .collect()
}

fn check_deadline(deadline: Option<Instant>, batch: usize) -> Result<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(NeardupError::cancelled(format!(
            "time budget exhausted before batch {batch}"
        ))),
        _ => Ok(()),
    }
}
