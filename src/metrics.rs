use tracing::trace;

// Per-request counters are exported by the Prometheus recorder; these hooks
// only trace, so they stay cheap inside hot paths.

pub fn inc_requests(route: &'static str) {
    trace!(target = "barter.metrics", route, "requests_total_inc");
}

pub fn phase_elapsed(phase: &'static str, elapsed_ms: u128) {
    trace!(
        target = "barter.metrics",
        phase,
        elapsed_ms = elapsed_ms as u64,
        "submission_phase_elapsed"
    );
}

pub fn images_ingested(accepted: usize, warnings: usize) {
    trace!(
        target = "barter.metrics",
        accepted = accepted as u64,
        warnings = warnings as u64,
        "images_ingested"
    );
}
