use actix_web::web;

async fn ok() -> &'static str {
    "OK"
}

/// Liveness/readiness probes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(ok))
        .route("/api/v1/health", web::get().to(ok))
        .route("/api/v1/health/live", web::get().to(ok))
        .route("/api/v1/health/ready", web::get().to(ok));
}
