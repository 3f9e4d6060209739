mod health;
mod run;

pub use health::health_handler;
pub use run::{RunRequest, RunResponse, post_run_handler, status_for, verdict_response};

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse};

use crate::job::Verdict;

/// Turns an unparsable request body into an `invalid_input` verdict
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::info!("Rejected malformed run request: {err}");
    let verdict = Verdict::invalid_input(format!("Invalid request body: {err}"));
    let response: HttpResponse = verdict_response(&verdict);
    InternalError::from_response(err, response).into()
}
