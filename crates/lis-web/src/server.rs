//! Web服务器

use axum::{
    routing::{get, post},
    Router,
};
use lis_core::Result;
use lis_workflow::WorkflowEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::handlers;

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
}

impl AppState {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, engine: Arc<WorkflowEngine>) -> Self {
        let app = create_app(AppState::new(engine));
        Self { addr, app }
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app).await?;

        Ok(())
    }
}

/// 完整应用：API路由和全局中间件
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health))
        .nest("/patients", patient_routes())
        .nest("/tests", test_routes())
        .nest("/results", result_routes())
        .nest("/reports", report_routes())
}

fn patient_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_patients).post(handlers::create_patient),
        )
        .route(
            "/:id",
            get(handlers::get_patient)
                .put(handlers::update_patient)
                .delete(handlers::delete_patient),
        )
}

fn test_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_tests).post(handlers::order_test))
        .route("/stats/dashboard", get(handlers::test_stats))
        .route("/workload/today", get(handlers::today_workload))
        .route(
            "/:id",
            get(handlers::get_test)
                .put(handlers::update_test)
                .delete(handlers::delete_test),
        )
        .route("/:id/collect", post(handlers::collect_test))
        .route("/:id/process", post(handlers::process_test))
        .route("/:id/complete", post(handlers::complete_test))
        .route("/:id/cancel", post(handlers::cancel_test))
}

fn result_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_results).post(handlers::create_result))
        .route("/stats/dashboard", get(handlers::result_stats))
        .route("/pending/review", get(handlers::pending_reviews))
        .route("/critical/values", get(handlers::critical_results))
        .route("/batch/approve", post(handlers::batch_approve))
        .route(
            "/:id",
            get(handlers::get_result)
                .put(handlers::update_result)
                .delete(handlers::delete_result),
        )
        .route("/:id/review", post(handlers::review_result))
        .route("/:id/approve", post(handlers::approve_result))
        .route("/:id/report", post(handlers::report_result))
        .route("/:id/amend", post(handlers::amend_result))
        .route("/:id/history", get(handlers::amendment_history))
        .route("/:id/critical-notify", post(handlers::notify_critical))
}

fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/analytics/dashboard", get(handlers::dashboard))
        .route("/turnaround", get(handlers::turnaround_report))
}
