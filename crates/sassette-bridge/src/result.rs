//! The result translator: one read of an [`EngineReport`] produces the
//! terminal [`JobOutcome`]. Status decides everything; success reads the
//! output fields, failure reads only the error description.

use sassette_engine::EngineReport;
use tracing::debug;

use crate::error::CompileFailure;
use crate::job::{JobOutcome, RenderOutput, Stats};

/// Translates the engine's pull-based report into the host-facing outcome.
///
/// A zero status is success even when the output text is empty; an empty
/// stylesheet legitimately compiles to nothing. Any other status becomes a
/// [`CompileFailure`], with the engine's structured error parsed when it
/// provided one.
pub(crate) fn finalize(report: &EngineReport) -> JobOutcome {
    if report.status == 0 {
        debug!(
            bytes = report.output.as_ref().map_or(0, String::len),
            included = report.included_files.len(),
            "compile succeeded"
        );
        Ok(RenderOutput {
            css: report.output.clone().unwrap_or_default(),
            map: report.source_map.clone(),
            stats: Stats {
                included_files: report.included_files.clone(),
            },
        })
    } else {
        let failure = CompileFailure::from_report(report);
        debug!(status = report.status, message = %failure.message, "compile failed");
        Err(failure)
    }
}
