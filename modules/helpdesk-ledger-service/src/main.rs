//! Help Desk Ledger Service: standalone binary answering FAQ questions and
//! recording every query in a deduplicating ledger.
//!
//! Hosts both an RPC API and a dashboard UI.
//! Default: http://127.0.0.1:9103/

mod config;
mod dashboard;
mod db;
mod dialog;
mod knowledge;
mod ledger;
mod normalize;
mod routes;
mod store;

use config::Config;
use knowledge::KnowledgeBase;
use ledger::QueryLedger;
use routes::AppState;
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("[HELPDESK] Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let kb = match KnowledgeBase::load(&config.faq_path) {
        Ok(kb) => kb,
        Err(e) => {
            log::error!("[HELPDESK] Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if kb.is_empty() {
        log::warn!("[KB] Knowledge base is empty; every question will close unanswered");
    }

    log::info!(
        "Opening ledger database at: {} (table {})",
        config.db_path,
        config.table_name
    );
    let database = match db::Db::open(&config.db_path, &config.table_name) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            log::error!("[HELPDESK] Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    if !config.update_ledger {
        log::warn!("[HELPDESK] Ledger writes disabled; questions will be answered but not recorded");
    }
    log::info!(
        "[HELPDESK] Create strategy: {:?}, store timeout: {}ms",
        config.create_strategy,
        config.store_timeout.as_millis()
    );

    let store = Arc::new(db::SqliteLedger::new(database.clone()));
    let ledger = Arc::new(QueryLedger::new(store, &config));
    let port = config.port;

    let state = Arc::new(AppState {
        db: database,
        ledger,
        kb: Arc::new(kb),
        config: Arc::new(config),
        start_time: Instant::now(),
    });

    let cors = tower_http::cors::CorsLayer::permissive();

    let app = axum::Router::new()
        .route("/", axum::routing::get(dashboard::dashboard))
        .route("/rpc/ask", axum::routing::post(routes::ask))
        .route("/rpc/observe", axum::routing::post(routes::observe))
        .route("/rpc/query/get", axum::routing::post(routes::get_query))
        .route("/rpc/queries/list", axum::routing::post(routes::list_queries))
        .route("/rpc/stats", axum::routing::get(routes::stats))
        .route("/rpc/status", axum::routing::get(routes::status))
        .with_state(state)
        .layer(cors);

    let addr = format!("127.0.0.1:{}", port);
    log::info!("Help Desk Ledger Service listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app).await.expect("Server error");
}
