use std::fmt::Write;

use crate::api::SchedulerStats;

fn metric(out: &mut String, ns: &str, name: &str, kind: &str, help: &str, value: u64) {
    let _ = write!(
        out,
        "# HELP {ns}_{name} {help}\n# TYPE {ns}_{name} {kind}\n{ns}_{name} {value}\n"
    );
}

/// Renders a stats snapshot in the Prometheus text exposition format.
pub fn render_stats(stats: &SchedulerStats, namespace: &str) -> String {
    let ns = if namespace.is_empty() {
        "actq"
    } else {
        namespace
    };

    let mut out = String::new();
    let counters = [
        ("enqueued_total", "Total entries enqueued", stats.enqueued),
        ("dispatched_total", "Total entries handed to the executor", stats.dispatched),
        ("succeeded_total", "Total executions that succeeded", stats.succeeded),
        ("failed_total", "Total executions that returned an error", stats.failed),
        ("aborted_total", "Total executions dropped without a result", stats.aborted),
        ("cancelled_total", "Total entries cancelled before dispatch", stats.cancelled),
        ("queue_time_sum_ns", "Sum of queue time in ns", stats.queue_time_sum_ns),
        ("queue_time_samples", "Total queue time samples", stats.queue_time_samples),
    ];
    for (name, help, value) in counters {
        metric(&mut out, ns, name, "counter", help, value);
    }

    let gauges = [
        ("queued", "Entries waiting for dispatch", stats.queued),
        ("in_flight", "Entries currently executing", stats.in_flight),
        ("active_keys", "Keys currently registered", stats.active_keys),
        ("queue_time_p95_ns", "Approx p95 queue time in ns", stats.queue_time_p95_ns),
        ("queue_time_p99_ns", "Approx p99 queue time in ns", stats.queue_time_p99_ns),
    ];
    for (name, help, value) in gauges {
        metric(&mut out, ns, name, "gauge", help, value);
    }

    if !stats.queue_time_histogram.is_empty() {
        let _ = write!(
            out,
            "# HELP {ns}_queue_time_ns Queue time histogram\n# TYPE {ns}_queue_time_ns histogram\n"
        );
        let mut cumulative = 0u64;
        for bucket in &stats.queue_time_histogram {
            cumulative = cumulative.saturating_add(bucket.count);
            let le = if bucket.le_ns == u64::MAX {
                "+Inf".to_string()
            } else {
                bucket.le_ns.to_string()
            };
            let _ = writeln!(out, "{ns}_queue_time_ns_bucket{{le=\"{le}\"}} {cumulative}");
        }
        let _ = write!(
            out,
            "{ns}_queue_time_ns_count {}\n{ns}_queue_time_ns_sum {}\n",
            stats.queue_time_samples, stats.queue_time_sum_ns
        );
    }

    out
}
