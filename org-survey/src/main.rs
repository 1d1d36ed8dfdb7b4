//! Survey GitHub organizations into CSV, JSON and Excel reports.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use org_survey_lib::{Host, run};
use std::io::Write;
use std::io::{stderr, stdout};
use tokio_util::sync::CancellationToken;

/// Default host that writes to the real stdout and stderr.
#[derive(Debug, Clone, Default)]
pub struct RealHost;

#[cfg_attr(coverage_nightly, coverage(off))]
impl Host for RealHost {
    fn output(&mut self) -> impl Write {
        stdout()
    }

    fn error(&mut self) -> impl Write {
        stderr()
    }
}

#[tokio::main]
#[cfg_attr(coverage_nightly, coverage(off))]
async fn main() -> Result<(), ohno::AppError> {
    let cancel = CancellationToken::new();

    let on_ctrl_c = cancel.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = writeln!(stderr(), "Interrupted, finishing buffered rows");
            on_ctrl_c.cancel();
        }
    });

    run(&mut RealHost, std::env::args(), cancel).await
}
