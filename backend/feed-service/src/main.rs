use actix_web::{dev::Service, web, App, HttpServer};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa_swagger_ui::SwaggerUi;

use feed_service::config::Config;
use feed_service::db::{self, PgFeedStore, PgPostStore, PgUserDirectory};
use feed_service::handlers::{self, AppState};
use feed_service::{metrics, openapi, FeedService, RedisResponseCache};

async fn openapi_json(
    doc: web::Data<utoipa::openapi::OpenApi>,
) -> actix_web::Result<actix_web::HttpResponse> {
    let body = serde_json::to_string(&*doc).map_err(|e| {
        tracing::error!("OpenAPI serialization failed: {}", e);
        actix_web::error::ErrorInternalServerError("OpenAPI serialization error")
    })?;

    Ok(actix_web::HttpResponse::Ok()
        .content_type("application/json")
        .body(body))
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true),
        )
        .init();
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {:#}", e);
            eprintln!("ERROR: Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting feed-service v{}", env!("CARGO_PKG_VERSION"));
    info!(
        env = %config.app.env,
        staleness_rule = %config.feed.staleness_rule,
        cache_ttl_secs = config.feed.cache_ttl_secs,
        "Configuration loaded"
    );

    let pool = match db::create_pool(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database pool creation failed: {}", e);
            eprintln!("ERROR: Failed to create database pool: {}", e);
            std::process::exit(1);
        }
    };

    if config.database.run_migrations {
        if let Err(e) = db::run_migrations(&pool).await {
            tracing::error!("Database migration failed: {}", e);
            eprintln!("ERROR: Failed to run migrations: {}", e);
            std::process::exit(1);
        }
    }

    let cache = match RedisResponseCache::connect(&config.redis.url).await {
        Ok(cache) => cache,
        Err(e) => {
            tracing::error!("Redis connection failed: {}", e);
            eprintln!("ERROR: Failed to connect to Redis: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = cache.ping().await {
        // Reads fail open, so a cold Redis only costs latency
        tracing::warn!("Redis not answering at startup: {}", e);
    }

    let users = Arc::new(PgUserDirectory::new(pool.clone()));
    let posts = Arc::new(PgPostStore::new(pool.clone()));
    let feeds = Arc::new(PgFeedStore::new(pool));

    let feed_service = Arc::new(FeedService::new(
        users.clone(),
        posts.clone(),
        feeds,
        Arc::new(cache),
        config.feed.clone(),
    ));

    let state = web::Data::new(AppState {
        users,
        posts,
        feed_service,
    });

    let bind_addr = format!("{}:{}", config.app.host, config.app.port);
    info!("HTTP server listening on {}", bind_addr);

    HttpServer::new(move || {
        let openapi_doc = openapi::doc();

        App::new()
            .app_data(web::Data::new(openapi_doc.clone()))
            .app_data(state.clone())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api/v1/openapi.json", openapi_doc.clone()),
            )
            .route("/api/v1/openapi.json", web::get().to(openapi_json))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(handlers::configure)
            .wrap_fn(|req, srv| {
                let method = req.method().to_string();
                let path = req
                    .match_pattern()
                    .unwrap_or_else(|| req.path().to_string());
                let start = Instant::now();

                let fut = srv.call(req);
                async move {
                    match fut.await {
                        Ok(res) => {
                            metrics::observe_http_request(
                                &method,
                                &path,
                                res.status().as_u16(),
                                start.elapsed(),
                            );
                            Ok(res)
                        }
                        Err(err) => {
                            metrics::observe_http_request(&method, &path, 500, start.elapsed());
                            Err(err)
                        }
                    }
                }
            })
    })
    .bind(bind_addr)?
    .run()
    .await
}
