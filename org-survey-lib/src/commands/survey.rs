use super::Host;
use super::common::{CommonArgs, Session};
use crate::Result;
use crate::engine::{Gate, PipelineStats, Surface};
use crate::reports::{OutputFormat, check_destination, create_writer, open_writer};
use crate::survey::{SurveyContext, SurveyKind, collect, resolve_orgs};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use compact_str::CompactString;
use ohno::{IntoAppError, bail};
use std::io::Write;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "  commands";

/// Arguments shared by the report commands
#[derive(Args, Debug)]
pub struct SurveyArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Organizations to survey (default is every organization the token's user belongs to)
    #[arg(long = "org", short = 'o', value_name = "LOGIN", value_delimiter = ',')]
    pub orgs: Vec<String>,

    /// Write the report to this file instead of stdout
    #[arg(long, value_name = "PATH", help_heading = "Report Output")]
    pub output: Option<Utf8PathBuf>,

    /// Report format (default is inferred from the output file's extension, else CSV)
    #[arg(long, value_name = "FORMAT", help_heading = "Report Output")]
    pub format: Option<OutputFormat>,

    /// Number of items processed concurrently (overrides the configuration file)
    #[arg(long, short = 'w', value_name = "COUNT")]
    pub workers: Option<usize>,
}

/// Arguments for running several reports in one invocation
#[derive(Args, Debug)]
pub struct AllArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Organizations to survey (default is every organization the token's user belongs to)
    #[arg(long = "org", short = 'o', value_name = "LOGIN", value_delimiter = ',')]
    pub orgs: Vec<String>,

    /// Reports to produce, in order (default is every report)
    #[arg(long = "report", short = 'r', value_name = "REPORT", value_delimiter = ',')]
    pub reports: Vec<SurveyKind>,

    /// Directory receiving one file per report, named after the report
    #[arg(long, short = 'd', value_name = "DIR", help_heading = "Report Output")]
    pub output_dir: Utf8PathBuf,

    /// Report format
    #[arg(long, value_name = "FORMAT", default_value = "csv", help_heading = "Report Output")]
    pub format: OutputFormat,

    /// Number of items processed concurrently (overrides the configuration file)
    #[arg(long, short = 'w', value_name = "COUNT")]
    pub workers: Option<usize>,
}

/// Run one survey and write its report to a file or to the host's output.
pub async fn process_survey<H: Host>(host: &mut H, kind: SurveyKind, args: &SurveyArgs, cancel: &CancellationToken) -> Result<()> {
    let session = Session::new(&args.common, args.workers)?;
    let format = OutputFormat::resolve(args.format, args.output.as_deref());
    check_destination(format, args.output.as_deref())?;
    let logins = parse_logins(&args.orgs);

    preflight(&session, cancel).await?;
    let monitor = Monitor::start(&session, cancel);

    let ctx = session.survey_context();
    let result = survey_one(host, &ctx, kind, format, args.output.as_deref(), &logins, cancel).await;
    monitor.stop().await;

    let stats = result?;
    let _ = writeln!(
        host.error(),
        "Wrote {} {kind} row(s) from {} item(s)",
        stats.succeeded, stats.items
    );
    if let Some(path) = &args.output {
        let _ = writeln!(host.error(), "Report saved to {path}");
    }

    Ok(())
}

/// Run every requested survey against one session, so fetched lists and profiles are
/// shared between the reports.
///
/// A failed report does not stop the ones after it. The error names how many failed.
pub async fn process_all<H: Host>(host: &mut H, args: &AllArgs, cancel: &CancellationToken) -> Result<()> {
    let session = Session::new(&args.common, args.workers)?;
    let logins = parse_logins(&args.orgs);
    let kinds = selected_kinds(&args.reports);

    std::fs::create_dir_all(&args.output_dir).into_app_err_with(|| format!("creating output directory '{}'", args.output_dir))?;

    preflight(&session, cancel).await?;
    let monitor = Monitor::start(&session, cancel);

    let ctx = session.survey_context();
    let mut failed = 0usize;
    let mut last_error = None;

    for kind in &kinds {
        if cancel.is_cancelled() {
            break;
        }

        let path = args.output_dir.join(format!("{}.{}", kind.name(), args.format.extension()));
        match survey_one(host, &ctx, *kind, args.format, Some(path.as_path()), &logins, cancel).await {
            Ok(stats) => {
                let _ = writeln!(
                    host.error(),
                    "Wrote {} {kind} row(s) from {} item(s) to {path}",
                    stats.succeeded, stats.items
                );
            }
            Err(err) => {
                let _ = writeln!(host.error(), "The {kind} report failed: {err}");
                failed += 1;
                last_error = Some(err);
            }
        }
    }

    monitor.stop().await;

    if let Some(err) = last_error {
        bail!("{failed} of {} report(s) failed, last error: {err}", kinds.len());
    }

    Ok(())
}

/// Collect the survey's items, and only then open its report and run the pipeline.
async fn survey_one<H: Host>(
    host: &mut H,
    ctx: &SurveyContext,
    kind: SurveyKind,
    format: OutputFormat,
    path: Option<&Utf8Path>,
    logins: &[CompactString],
    cancel: &CancellationToken,
) -> Result<PipelineStats> {
    let orgs = resolve_orgs(ctx, cancel, logins).await?;
    let items = collect(kind, ctx, cancel, &orgs).await?;

    match path {
        Some(path) => {
            let mut writer = create_writer(format, path)?;
            items.run(ctx, cancel, &mut writer).await
        }
        None => {
            let mut writer = open_writer(format, None, host.output())?;
            items.run(ctx, cancel, &mut writer).await
        }
    }
}

fn parse_logins(orgs: &[String]) -> Vec<CompactString> {
    orgs.iter()
        .map(|org| CompactString::from(org.trim()))
        .filter(|org| !org.is_empty())
        .collect()
}

/// Requested report kinds without repeats, or every kind when none is requested.
fn selected_kinds(requested: &[SurveyKind]) -> Vec<SurveyKind> {
    if requested.is_empty() {
        return SurveyKind::ALL.to_vec();
    }

    let mut kinds = Vec::with_capacity(requested.len());
    for kind in requested {
        if !kinds.contains(kind) {
            kinds.push(*kind);
        }
    }
    kinds
}

async fn preflight(session: &Session, cancel: &CancellationToken) -> Result<()> {
    match session.governor().refresh_and_wait(session.client(), Surface::Core, cancel).await? {
        Gate::Open => {}
        Gate::Waited(waited) => log::info!(target: LOG_TARGET, "Waited {}s for the core budget to reset", waited.as_secs()),
        Gate::Unchecked => log::warn!(target: LOG_TARGET, "Starting without a budget check"),
    }
    Ok(())
}

/// The background budget refresh that runs alongside the surveys.
struct Monitor {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    fn start(session: &Session, cancel: &CancellationToken) -> Self {
        let cancel = cancel.child_token();
        let interval = session.config.monitor_interval;
        let handle = (!interval.is_zero()).then(|| {
            session
                .governor()
                .monitor(Arc::new(session.client().clone()), interval, cancel.clone())
        });

        Self { cancel, handle }
    }

    async fn stop(self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle {
            let _ = handle.await;
        }
    }
}
