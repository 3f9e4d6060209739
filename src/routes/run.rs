use actix_web::http::StatusCode;
use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};

use crate::job::{Verdict, VerdictKind};
use crate::judge::Judge;

#[derive(Deserialize, Debug)]
pub struct RunRequest {
    #[serde(default = "default_language")]
    pub language: String,
    /// `None` when the field is missing or null, which is not the same as ""
    pub code: Option<String>,
    pub input: Option<String>,
}

fn default_language() -> String {
    "cpp".to_string()
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "type")]
    pub kind: VerdictKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl From<&Verdict> for RunResponse {
    fn from(verdict: &Verdict) -> Self {
        if verdict.is_success() {
            return Self {
                success: true,
                output: Some(verdict.output.clone()),
                error: None,
                kind: verdict.kind,
                execution_time: Some(verdict.execution_time_ms.unwrap_or(0)),
                memory_used: Some(verdict.memory_used_kb),
                stderr: None,
            };
        }

        let stderr = match verdict.kind {
            VerdictKind::RuntimeError => verdict.diagnostics.clone(),
            _ => None,
        };

        Self {
            success: false,
            output: None,
            error: Some(
                verdict
                    .error
                    .clone()
                    .or_else(|| verdict.diagnostics.clone())
                    .unwrap_or_default(),
            ),
            kind: verdict.kind,
            execution_time: verdict.execution_time_ms,
            memory_used: None,
            stderr,
        }
    }
}

pub fn status_for(kind: VerdictKind) -> StatusCode {
    match kind {
        VerdictKind::Success => StatusCode::OK,
        VerdictKind::InvalidInput | VerdictKind::CompilationError => StatusCode::BAD_REQUEST,
        VerdictKind::TimeLimitExceeded => StatusCode::REQUEST_TIMEOUT,
        VerdictKind::RuntimeError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn verdict_response(verdict: &Verdict) -> HttpResponse {
    HttpResponse::build(status_for(verdict.kind)).json(RunResponse::from(verdict))
}

#[post("/run")]
pub async fn post_run_handler(judge: web::Data<Judge>, body: web::Json<RunRequest>) -> impl Responder {
    let RunRequest {
        language,
        code,
        input,
    } = body.into_inner();

    let verdict = judge
        .execute(&language, code.as_deref(), input.as_deref())
        .await;
    verdict_response(&verdict)
}
