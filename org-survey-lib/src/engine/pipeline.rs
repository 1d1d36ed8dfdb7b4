//! Fan-out/fan-in engine shared by every survey.
//!
//! [`run`] feeds a list of items through a bounded pool of worker tasks. Each worker takes
//! an item, waits for a [`RateLimiter`] token, runs the [`Processor`], formats the output
//! with the [`Formatter`], and hands the row to the collector. The collector is the calling
//! future itself: it owns the [`ReportWriter`] and writes rows in completion order, so the
//! sink never sees concurrent calls.
//!
//! Per-item failures are counted and logged but never stop the run. An
//! [`ErrorKind::Auth`] failure stops it, since bad credentials affect every item alike.

use super::{ClassifiedError, ErrorKind, RateLimiter};
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "  pipeline";

/// One formatted output record; always as wide as the [`Header`].
pub type Row = Vec<String>;

/// Column names of a report.
pub type Header = Vec<String>;

/// Turns one work item into a processed result, typically by making further remote calls.
pub trait Processor<I, O>: Send + Sync + 'static {
    fn process(&self, cancel: CancellationToken, item: I) -> impl Future<Output = Result<O, ClassifiedError>> + Send;
}

impl<I, O, F, Fut> Processor<I, O> for F
where
    F: Fn(CancellationToken, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ClassifiedError>> + Send,
{
    fn process(&self, cancel: CancellationToken, item: I) -> impl Future<Output = Result<O, ClassifiedError>> + Send {
        self(cancel, item)
    }
}

/// Turns a processed result into a row.
pub trait Formatter<O>: Send + Sync + 'static {
    fn header(&self) -> Header;

    fn format(&self, output: O) -> Row;
}

/// Destination for a report's rows.
///
/// `write_header` is called once, then `write_row` any number of times, then `close`
/// exactly once.
pub trait ReportWriter {
    fn write_header(&mut self, header: &[String]) -> crate::Result<()>;

    fn write_row(&mut self, row: &[String]) -> crate::Result<()>;

    fn close(&mut self) -> crate::Result<()>;
}

impl<W: ReportWriter + ?Sized> ReportWriter for Box<W> {
    fn write_header(&mut self, header: &[String]) -> crate::Result<()> {
        (**self).write_header(header)
    }

    fn write_row(&mut self, row: &[String]) -> crate::Result<()> {
        (**self).write_row(row)
    }

    fn close(&mut self) -> crate::Result<()> {
        (**self).close()
    }
}

/// Counts from one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Items handed to the run.
    pub items: usize,

    /// Rows written to the sink.
    pub succeeded: usize,

    /// Items whose processing failed.
    pub failed: usize,

    /// Rows (or the final close) the sink failed to write.
    pub write_failures: usize,
}

#[derive(Debug)]
pub enum PipelineError {
    /// The caller's cancellation token fired.
    Canceled { stats: PipelineStats },

    /// Processing hit an authentication failure and the rest of the run was abandoned.
    Aborted { stats: PipelineStats, cause: ClassifiedError },

    /// The run completed, but some items or writes failed.
    Failed {
        stats: PipelineStats,
        last_error: Option<ClassifiedError>,
        last_write_error: Option<ohno::AppError>,
    },

    /// The sink rejected the header, so no work was started.
    Sink(ohno::AppError),
}

impl PipelineError {
    #[must_use]
    pub const fn stats(&self) -> Option<&PipelineStats> {
        match self {
            Self::Canceled { stats } | Self::Aborted { stats, .. } | Self::Failed { stats, .. } => Some(stats),
            Self::Sink(_) => None,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canceled { stats } => write!(f, "run canceled after writing {} of {} row(s)", stats.succeeded, stats.items),
            Self::Aborted { cause, .. } => write!(f, "run aborted: {cause}"),
            Self::Failed {
                stats,
                last_error,
                last_write_error,
            } => {
                write!(
                    f,
                    "{} of {} item(s) failed and {} write(s) failed",
                    stats.failed, stats.items, stats.write_failures
                )?;
                if let Some(e) = last_error {
                    write!(f, "; last error: {e}")?;
                }
                if let Some(e) = last_write_error {
                    write!(f, "; last write error: {e:#}")?;
                }
                Ok(())
            }
            Self::Sink(e) => write!(f, "could not write report header: {e:#}"),
        }
    }
}

impl core::error::Error for PipelineError {}

/// Failure bookkeeping shared by the workers.
#[derive(Debug, Default)]
struct Tally {
    failures: AtomicUsize,
    last_error: Mutex<Option<ClassifiedError>>,
    auth: OnceLock<ClassifiedError>,
}

impl Tally {
    fn record(&self, error: ClassifiedError) {
        let _ = self.failures.fetch_add(1, Ordering::Relaxed);
        if error.kind() == ErrorKind::Auth {
            let _ = self.auth.set(error.clone());
        }
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    fn last_error(&self) -> Option<ClassifiedError> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Process `items` with `workers` concurrent tasks and write one row per success.
///
/// The header is written before any worker starts and the writer is closed exactly once
/// after it, whatever the outcome. Returns `Ok` only if every item was processed and every
/// row written.
pub async fn run<I, O, P, F, W>(
    cancel: &CancellationToken,
    items: Vec<I>,
    processor: Arc<P>,
    formatter: Arc<F>,
    limiter: Arc<RateLimiter>,
    workers: usize,
    writer: &mut W,
) -> Result<PipelineStats, PipelineError>
where
    I: Send + 'static,
    O: Send + 'static,
    P: Processor<I, O>,
    F: Formatter<O>,
    W: ReportWriter + ?Sized,
{
    let workers = workers.max(1);
    let mut stats = PipelineStats {
        items: items.len(),
        ..PipelineStats::default()
    };

    if let Err(e) = writer.write_header(&formatter.header()) {
        if let Err(close_err) = writer.close() {
            log::warn!(target: LOG_TARGET, "Could not close report after header failure: {close_err:#}");
        }
        return Err(PipelineError::Sink(e));
    }

    log::info!(target: LOG_TARGET, "Processing {} item(s) with {workers} worker(s)", stats.items);

    let run_cancel = cancel.child_token();
    let tally = Arc::new(Tally::default());
    let (item_tx, item_rx) = mpsc::channel::<I>(workers);
    let item_rx = Arc::new(tokio::sync::Mutex::new(item_rx));
    let (row_tx, mut row_rx) = mpsc::channel::<Row>(workers);

    let mut tasks = JoinSet::new();
    let _ = tasks.spawn(distribute(items, item_tx, run_cancel.clone()));
    for id in 0..workers {
        let _ = tasks.spawn(work(
            id,
            Arc::clone(&item_rx),
            row_tx.clone(),
            Arc::clone(&processor),
            Arc::clone(&formatter),
            Arc::clone(&limiter),
            run_cancel.clone(),
            Arc::clone(&tally),
        ));
    }

    // the channel closes once every worker has dropped its sender
    drop(row_tx);
    drop(item_rx);

    let mut last_write_error = None;
    let mut write = |row: &[String], stats: &mut PipelineStats| match writer.write_row(row) {
        Ok(()) => stats.succeeded += 1,
        Err(e) => {
            log::warn!(target: LOG_TARGET, "Could not write row: {e:#}");
            stats.write_failures += 1;
            last_write_error = Some(e);
        }
    };

    loop {
        tokio::select! {
            biased;
            () = run_cancel.cancelled() => {
                tasks.abort_all();
                break;
            }
            row = row_rx.recv() => match row {
                Some(row) => write(&row, &mut stats),
                None => break,
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined
            && e.is_panic()
        {
            log::error!(target: LOG_TARGET, "A pipeline worker panicked");
            tally.record(ClassifiedError::fatal(ohno::app_err!("pipeline worker panicked")));
        }
    }

    // rows finished before the run was stopped are still worth keeping
    while let Ok(row) = row_rx.try_recv() {
        write(&row, &mut stats);
    }

    if let Err(e) = writer.close() {
        log::warn!(target: LOG_TARGET, "Could not close report: {e:#}");
        stats.write_failures += 1;
        last_write_error = Some(e);
    }

    stats.failed = tally.failures();

    if cancel.is_cancelled() {
        log::warn!(target: LOG_TARGET, "Run canceled after writing {} row(s)", stats.succeeded);
        return Err(PipelineError::Canceled { stats });
    }

    if let Some(cause) = tally.auth.get() {
        return Err(PipelineError::Aborted {
            stats,
            cause: cause.clone(),
        });
    }

    if stats.failed > 0 || stats.write_failures > 0 {
        return Err(PipelineError::Failed {
            stats,
            last_error: tally.last_error(),
            last_write_error,
        });
    }

    log::info!(target: LOG_TARGET, "Wrote {} row(s)", stats.succeeded);
    Ok(stats)
}

async fn distribute<I: Send>(items: Vec<I>, tx: mpsc::Sender<I>, cancel: CancellationToken) {
    for item in items {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = tx.send(item) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

#[expect(clippy::too_many_arguments, reason = "Each worker needs its own handle on every shared piece")]
async fn work<I, O, P, F>(
    id: usize,
    items: Arc<tokio::sync::Mutex<mpsc::Receiver<I>>>,
    rows: mpsc::Sender<Row>,
    processor: Arc<P>,
    formatter: Arc<F>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
    tally: Arc<Tally>,
) where
    I: Send + 'static,
    O: Send + 'static,
    P: Processor<I, O>,
    F: Formatter<O>,
{
    loop {
        let next = {
            let mut rx = items.lock().await;
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                item = rx.recv() => item,
            }
        };

        let Some(item) = next else {
            break;
        };

        if limiter.acquire(&cancel).await.is_err() {
            break;
        }

        match processor.process(cancel.clone(), item).await {
            Ok(output) => {
                let row = formatter.format(output);
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    sent = rows.send(row) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }

            Err(_) if cancel.is_cancelled() => break,

            Err(e) if e.kind() == ErrorKind::Auth => {
                log::error!(target: LOG_TARGET, "Worker {id} hit an authentication failure, stopping the run: {e}");
                tally.record(e);
                cancel.cancel();
                break;
            }

            Err(e) => {
                log::warn!(target: LOG_TARGET, "Worker {id} could not process an item: {e}");
                tally.record(e);
            }
        }
    }

    log::trace!(target: LOG_TARGET, "Worker {id} done");
}
