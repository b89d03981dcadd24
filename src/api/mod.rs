pub mod documents;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod routes;

use actix_web::{get, web, HttpResponse, Responder};

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "healthy"}))
}

/// Registers every route. Callers wrap the app in `UserAuth` and provide
/// `AuthConfig`, `DbPool` and `Orchestrator` as app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .configure(routes::configure)
        .configure(documents::configure);
}
