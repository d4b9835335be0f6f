//! Observability Surface (C8).
//!
//! The scheduler produces its own `workflow.execute`/`agent.execute`
//! spans directly via `tracing` (see `loomwright_workflow::scheduler`);
//! this module supplies the metric instruments and implements
//! [`SchedulerObserver`] so the scheduler's lifecycle callbacks land as
//! counters and histograms without `loomwright-workflow` itself needing
//! an opentelemetry dependency.

use loomwright_core::{AgentId, WorkflowId, WorkflowRunId};
use loomwright_workflow::{AgentRunStatus, RunStatus, SchedulerObserver};
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
use opentelemetry::KeyValue;

/// Metric instruments backing the orchestrator's observability contract.
pub struct Metrics {
    workflow_runs_total: Counter<u64>,
    agent_runs_total: Counter<u64>,
    agent_errors_total: Counter<u64>,
    agent_retry_count: Counter<u64>,
    workflows_active: UpDownCounter<i64>,
    workflow_duration_ms: Histogram<u64>,
    agent_duration_ms: Histogram<u64>,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("loomwright");
        Self {
            workflow_runs_total: meter.u64_counter("workflow_runs_total").build(),
            agent_runs_total: meter.u64_counter("agent_runs_total").build(),
            agent_errors_total: meter.u64_counter("agent_errors_total").build(),
            agent_retry_count: meter.u64_counter("agent_retry_count").build(),
            workflows_active: meter.i64_up_down_counter("workflows_active").build(),
            workflow_duration_ms: meter.u64_histogram("workflow_duration_ms").build(),
            agent_duration_ms: meter.u64_histogram("agent_duration_ms").build(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerObserver for Metrics {
    fn run_started(&self, _run_id: WorkflowRunId, _workflow_id: WorkflowId, _workflow_name: &str, _trigger: &str) {
        self.workflows_active.add(1, &[]);
    }

    fn run_finished(&self, _run_id: WorkflowRunId, status: RunStatus, duration_ms: u64) {
        let status_label = format!("{status:?}").to_lowercase();
        self.workflows_active.add(-1, &[]);
        self.workflow_runs_total.add(1, &[KeyValue::new("status", status_label)]);
        self.workflow_duration_ms.record(duration_ms, &[]);
    }

    fn agent_started(&self, _run_id: WorkflowRunId, _agent_id: AgentId, _agent_name: &str, _action: &str, _attempt: u32) {}

    fn agent_finished(
        &self,
        _run_id: WorkflowRunId,
        agent_name: &str,
        status: AgentRunStatus,
        failure_kind: Option<&str>,
        duration_ms: u64,
    ) {
        let status_label = format!("{status:?}").to_lowercase();
        self.agent_runs_total.add(1, &[KeyValue::new("agent", agent_name.to_string()), KeyValue::new("status", status_label)]);
        self.agent_duration_ms.record(duration_ms, &[KeyValue::new("agent", agent_name.to_string())]);
        if let Some(kind) = failure_kind {
            self.agent_errors_total
                .add(1, &[KeyValue::new("agent", agent_name.to_string()), KeyValue::new("kind", kind.to_string())]);
        }
    }

    fn agent_retried(&self, agent_name: &str) {
        self.agent_retry_count.add(1, &[KeyValue::new("agent", agent_name.to_string())]);
    }
}

/// Installs the stdout metrics exporter and the tracing subscriber.
///
/// Production deployments point `exporter_endpoint` at an OTLP collector
/// instead; local development and tests use the stdout exporter so spans
/// and metrics are visible without external infrastructure.
pub fn init(exporter_endpoint: &str) {
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let metrics_exporter = opentelemetry_sdk::metrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default()).build();
    let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().with_reader(metrics_exporter).build();
    opentelemetry::global::set_meter_provider(meter_provider);

    // The `workflow.execute`/`agent.execute` spans the scheduler opens
    // with `tracing::info_span!` are bridged into OTel traces here, so
    // they're exported alongside the metrics above rather than only
    // ever rendered through the fmt layer.
    let tracer_provider =
        opentelemetry_sdk::trace::SdkTracerProvider::builder().with_simple_exporter(opentelemetry_stdout::SpanExporter::default()).build();
    let tracer = tracer_provider.tracer("loomwright");

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .init();

    tracing::info!(exporter_endpoint, "observability initialised");
}
