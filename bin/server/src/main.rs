use loomwright_safety::{RateLimiter, SafetyEnvelope};
use loomwright_server::alert_directory::ensure_notifier_agent_seeded;
use loomwright_server::config::ServerConfig;
use loomwright_server::db::SqlxGateway;
use loomwright_server::db::WorkflowRepository;
use loomwright_server::observability::{self, Metrics};
use loomwright_server::state::{AppState, Scheduler};
use loomwright_server::{db, routes};
use loomwright_core::AgentId;
use loomwright_workflow::{
    DagScheduler, InMemoryApprovalCoordinator, NatsEventBusClient, PersistenceGateway, ProcessContainerExecutor,
    RunStatus, SchedulerObserver,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = ServerConfig::from_env().expect("failed to load configuration");
    observability::init(&config.observability.exporter_endpoint);
    tracing::info!("loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations").run(&db_pool).await.expect("failed to run migrations");

    let registry: Arc<dyn WorkflowRepository> = Arc::new(db::SqlxWorkflowRepository::new(db_pool.clone()));
    ensure_notifier_agent_seeded(&*registry).await.expect("failed to seed system notifier agent");

    tracing::info!(url = %config.nats_url, "connecting to event bus");
    let bus = Arc::new(NatsEventBusClient::connect(&config.nats_url).await.expect("failed to connect to NATS"));

    let gateway = Arc::new(SqlxGateway::new(db_pool.clone()));
    let approvals = Arc::new(InMemoryApprovalCoordinator::new());
    let executor = Arc::new(SafetyEnvelope::new(ProcessContainerExecutor));
    let metrics = Arc::new(Metrics::new());
    let observer: Arc<dyn SchedulerObserver> = Arc::clone(&metrics) as Arc<dyn SchedulerObserver>;
    let scheduler =
        Arc::new(DagScheduler::new(gateway.clone(), approvals, executor, bus.clone()).with_observer(observer));

    let rate_limiter = Arc::new(RateLimiter::new(config.safety.requests_per_minute));

    recover_non_terminal_runs(&registry, &gateway, &scheduler).await;

    let state = AppState::new(db_pool, gateway, scheduler, bus, rate_limiter, metrics);
    let app = routes::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind to address");
    tracing::info!(%addr, "listening");

    axum::serve(listener, app.into_make_service()).await.expect("server error");
}

/// Resumes runs left non-terminal by a prior process exit. Each run is
/// rebuilt from its persisted event log and driven forward on a spawned
/// task; a run with nothing left to dispatch re-suspends immediately, so
/// this is safe to call unconditionally on every boot.
async fn recover_non_terminal_runs(registry: &Arc<dyn WorkflowRepository>, gateway: &Arc<SqlxGateway>, scheduler: &Arc<Scheduler>) {
    for status in [RunStatus::Pending, RunStatus::Running, RunStatus::WaitingApproval] {
        let runs = match gateway.list_runs_by_status(status).await {
            Ok(runs) => runs,
            Err(e) => {
                tracing::error!(error = %e, ?status, "recovery scan: failed to list runs");
                continue;
            }
        };
        for run in runs {
            let workflow = match registry.get_workflow(run.workflow_id).await {
                Ok(workflow) => workflow,
                Err(e) => {
                    tracing::error!(error = %e, run_id = %run.id, "recovery scan: failed to load workflow");
                    continue;
                }
            };
            let agent_ids: Vec<AgentId> = workflow.graph.nodes().map(|n| n.agent_id).collect();
            let agents = match registry.agents_by_id(&agent_ids).await {
                Ok(agents) => agents,
                Err(e) => {
                    tracing::error!(error = %e, run_id = %run.id, "recovery scan: failed to load agents");
                    continue;
                }
            };

            tracing::info!(run_id = %run.id, ?status, "recovery scan: resuming run");
            let scheduler = Arc::clone(scheduler);
            let run_id = run.id;
            tokio::spawn(async move {
                if let Err(e) = scheduler.drive_run(&workflow, &agents, run_id).await {
                    tracing::error!(error = %e, %run_id, "recovery scan: failed to resume run");
                }
            });
        }
    }
}
