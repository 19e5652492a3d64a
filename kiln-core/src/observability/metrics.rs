//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    // Build graph metrics
    describe_counter!(
        "kiln_provisioners_compiled_total",
        "Total provisioners compiled into a build graph (by kind)"
    );
    describe_histogram!("kiln_build_duration_seconds", "Container build duration (by image name)");
    describe_counter!("kiln_build_failures_total", "Total number of build failures");

    // AMI component metrics
    describe_counter!(
        "kiln_components_registered_total",
        "Total component registrations (by outcome: created, reused)"
    );

    // Manifest metrics
    describe_counter!(
        "kiln_manifest_entries_skipped_total",
        "Manifest entries skipped because they could not be resolved in the registry"
    );
}

pub fn record_provisioner_compiled(kind: &str) {
    counter!("kiln_provisioners_compiled_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_build(duration_secs: f64, image: &str) {
    histogram!("kiln_build_duration_seconds", "image" => image.to_string()).record(duration_secs);
}

pub fn record_build_failure() {
    counter!("kiln_build_failures_total").increment(1);
}

pub fn record_component_registered(outcome: &str) {
    counter!("kiln_components_registered_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_manifest_entry_skipped() {
    counter!("kiln_manifest_entries_skipped_total").increment(1);
}
