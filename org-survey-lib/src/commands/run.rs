//! Command dispatch logic for org-survey

use super::{AllArgs, BudgetsArgs, InitArgs, SurveyArgs, init_config, process_all, process_survey, show_budgets};
use crate::survey::SurveyKind;
use crate::{Host, Result};
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "org-survey", author, version, long_about = None)]
#[command(about = "Survey GitHub organizations into CSV, JSON and Excel reports")]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: SurveySubcommand,
}

#[derive(Subcommand, Debug)]
enum SurveySubcommand {
    /// Report every repository with its settings and the teams that can access it
    Repos(Box<SurveyArgs>),
    /// Report every team with its member and repository counts
    Teams(Box<SurveyArgs>),
    /// Report every member with their public profile
    Members(Box<SurveyArgs>),
    /// Run several reports in one pass, sharing fetched data, into a directory
    All(Box<AllArgs>),
    /// Show the remaining rate-limit budget of each API surface
    Budgets(Box<BudgetsArgs>),
    /// Generate a default configuration file
    Init(InitArgs),
}

/// Dispatch command-line arguments to the appropriate handler
///
/// This function parses the command-line arguments and executes the corresponding
/// subcommand. Long-running commands stop early once `cancel` fires.
///
/// # Errors
///
/// Returns an error if command parsing fails or if the executed command fails
pub async fn run<I, T, H>(host: &mut H, args: I, cancel: CancellationToken) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    H: Host,
{
    let cli = Cli::parse_from(args);

    match &cli.command {
        SurveySubcommand::Repos(args) => process_survey(host, SurveyKind::Repos, args, &cancel).await,
        SurveySubcommand::Teams(args) => process_survey(host, SurveyKind::Teams, args, &cancel).await,
        SurveySubcommand::Members(args) => process_survey(host, SurveyKind::Members, args, &cancel).await,
        SurveySubcommand::All(args) => process_all(host, args, &cancel).await,
        SurveySubcommand::Budgets(args) => show_budgets(host, args, &cancel).await,
        SurveySubcommand::Init(args) => init_config(host, args),
    }
}
