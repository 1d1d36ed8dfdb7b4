//! Command-line interface and orchestration for org-survey
//!
//! This module implements the CLI commands and wires the engine, the GitHub client,
//! and the report writers together. It handles argument parsing, configuration
//! management, and the high-level workflows.
//!
//! ## Commands
//!
//! - **repos**, **teams**, **members**: Run one survey over the requested organizations
//!   and write its report to stdout or a file
//! - **all**: Run several surveys against one session and write one report file per
//!   survey into a directory, so lists and profiles fetched once serve every report
//! - **budgets**: Print the remaining rate-limit budget of each API surface
//! - **init**: Generate a default configuration file
//!
//! ## Execution Flow
//!
//! The `run` function parses command-line arguments using clap and routes to the
//! appropriate command handler. The survey commands follow the same steps:
//!
//! 1. Initialize logging, load the configuration, and apply command-line overrides
//! 2. Check that the report can go where it was asked to
//! 3. Check the core budget, waiting for a reset if it is nearly spent
//! 4. Start the budget monitor and collect the survey's top-level items
//! 5. Open the report sink and run the items through the pipeline
//! 6. Print a summary, or return the aggregate error
//!
//! The sink is opened only once the items are in hand, so a survey that fails early
//! leaves an existing report file untouched.
//!
//! Configuration is read from `survey.toml` in the current directory, or from the
//! file named by `--config`.

mod budgets;
mod common;
mod config;
mod host;
mod init;
mod run;
mod survey;

pub use budgets::{BudgetsArgs, show_budgets};
pub use common::{CommonArgs, LogLevel, Session};
pub use config::Config;
pub use host::Host;
pub use init::{InitArgs, init_config};
pub use run::run;
pub use survey::{AllArgs, SurveyArgs, process_all, process_survey};
