use actix_web::{HttpResponse, Responder, get};
use serde::Serialize;

use crate::create_timestamp;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

#[get("/health")]
pub async fn health_handler() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        timestamp: create_timestamp(),
    })
}
