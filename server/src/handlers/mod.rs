/// HTTP handlers module
/// Thin REST endpoints over the service layer; every failure is an `AppError`.
pub mod applications;
pub mod auth;
pub mod chat;
pub mod courses;

use actix_web::HttpResponse;
use serde_json::json;

/// Health check endpoint
/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok"
    }))
}
