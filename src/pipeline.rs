use crate::config::Config;
use crate::db::BatchSink;
use crate::error::{AppError, Result};
use crate::fetcher::Fetcher;
use crate::loader::{BatchLoader, LoadSummary};
use crate::raw_store::{RawHandle, RawStore};
use crate::report;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::staged;
use crate::transform::{TransformStats, Transformer};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// The orchestrator's sequential units. Each either completes or halts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extracting,
    Transforming,
    Loading,
    Reporting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extracting => "Extracting",
            Stage::Transforming => "Transforming",
            Stage::Loading => "Loading",
            Stage::Reporting => "Reporting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub saved: Vec<RawHandle>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub extract: ExtractSummary,
    pub transform: TransformStats,
    pub rows_staged: usize,
    pub load: LoadSummary,
    pub reports: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn log(&self) {
        info!(
            "Extraction: {} locations attempted, {} succeeded, {} failed",
            self.extract.attempted, self.extract.succeeded, self.extract.failed
        );
        info!(
            "Transformation: {} payloads ({} skipped), {} rows seen, {} dropped, {} staged",
            self.transform.payloads_seen,
            self.transform.payloads_skipped,
            self.transform.rows_seen,
            self.transform.rows_dropped,
            self.rows_staged
        );
        info!(
            "Load: {} rows processed, {} inserted, {} failed ({}/{} batches failed)",
            self.load.total(),
            self.load.succeeded,
            self.load.failed,
            self.load.batches_failed,
            self.load.batches
        );
        info!("Pipeline finished in {:.2}s", self.elapsed.as_secs_f64());
    }
}

pub struct Pipeline {
    config: Config,
    fetcher: Fetcher,
    store: RawStore,
    transformer: Transformer,
    loader: BatchLoader,
    source_retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(config: Config, sink: Arc<dyn BatchSink>) -> Result<Self> {
        let fetcher = Fetcher::new(&config.source)?;
        let store = RawStore::new(&config.storage.raw_dir);
        let transformer = Transformer::new(config.transform.severity_policy);
        let loader = BatchLoader::new(sink, config.sink.batch_size, config.sink.retry.policy());
        let source_retry = config.source.retry.policy();

        Ok(Self {
            config,
            fetcher,
            store,
            transformer,
            loader,
            source_retry,
        })
    }

    /// Extract, transform, load, report. The first stage error halts the run.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        info!("STEP 1: EXTRACT ({} locations)", self.config.locations.len());
        summary.extract = self
            .extract()
            .await
            .map_err(|e| e.in_stage(Stage::Extracting))?;

        info!("STEP 2: TRANSFORM ({})", self.store.dir().display());
        let (stats, rows_staged) = self
            .transform()
            .map_err(|e| e.in_stage(Stage::Transforming))?;
        summary.transform = stats;
        summary.rows_staged = rows_staged;

        info!("STEP 3: LOAD");
        summary.load = self
            .load()
            .await
            .map_err(|e| e.in_stage(Stage::Loading))?;

        info!("STEP 4: REPORT");
        summary.reports = self.report().map_err(|e| e.in_stage(Stage::Reporting))?;

        summary.elapsed = started.elapsed();
        summary.log();
        Ok(summary)
    }

    /// Fetch and persist one payload per location. Individual failures are
    /// counted; only a run where nothing was extracted is an error.
    pub async fn extract(&self) -> Result<ExtractSummary> {
        let mut summary = ExtractSummary::default();

        for location in &self.config.locations {
            summary.attempted += 1;
            let what = format!("Fetch {}", location.name);

            let fetched =
                retry_with_backoff(&self.source_retry, &what, || self.fetcher.fetch(location)).await;

            let saved = fetched.and_then(|payload| self.store.save(location, &payload));
            match saved {
                Ok(handle) => {
                    summary.succeeded += 1;
                    summary.saved.push(handle);
                }
                Err(e) => {
                    error!("Skipping {}: {}", location.name, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Extraction summary: {} attempted, {} succeeded",
            summary.attempted, summary.succeeded
        );

        if summary.succeeded == 0 {
            return Err(AppError::NoLocationsExtracted {
                attempted: summary.attempted,
            });
        }

        Ok(summary)
    }

    /// Transform every raw artifact and write the staged file.
    ///
    /// Returns the stats and the number of rows staged.
    pub fn transform(&self) -> Result<(TransformStats, usize)> {
        let (readings, stats) = self.transformer.transform_store(&self.store)?;

        if stats.payloads_seen == 0 {
            return Err(AppError::InputMissing(format!(
                "no raw artifacts in {}",
                self.store.dir().display()
            )));
        }

        if stats.payloads_skipped == stats.payloads_seen {
            return Err(AppError::InputMissing(format!(
                "none of the {} raw artifacts could be transformed",
                stats.payloads_seen
            )));
        }

        let rows = staged::write_readings(&self.config.storage.staged_file, &readings)?;
        info!(
            "Transformation summary: {} rows kept, {} dropped, {} payloads skipped",
            stats.rows_kept, stats.rows_dropped, stats.payloads_skipped
        );

        Ok((stats, rows))
    }

    pub async fn load(&self) -> Result<LoadSummary> {
        let readings = staged::read_readings(&self.config.storage.staged_file)?;
        Ok(self.loader.load(&readings).await)
    }

    pub fn report(&self) -> Result<Vec<PathBuf>> {
        let readings = staged::read_readings(&self.config.storage.staged_file)?;
        report::write_reports(&self.config.storage.report_dir, &readings)
    }
}
