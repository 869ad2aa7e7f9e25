//! Pipeline endpoints: `POST /upload` runs the fraud workflow on an uploaded
//! ID card image, `POST /chat` runs the chat workflow on a text message.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use idguard_agent::{fraud_entry_message, AgentRuntime, RunContext, RunError, WorkflowDefinition};
use idguard_core::errors::{ApplicationError, InterfaceError};

pub const UPLOAD_FALLBACK_RESPONSE: &str = "Agent did not produce a final response.";
pub const CHAT_FALLBACK_RESPONSE: &str = "Sorry, I could not process your request.";

#[derive(Clone)]
pub struct AppState {
    pub runtime: AgentRuntime,
    pub fraud: Arc<WorkflowDefinition>,
    pub chat: Arc<WorkflowDefinition>,
    pub upload_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    pub response: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self(InterfaceError::BadRequest { message: message.into(), correlation_id: String::new() })
    }

    fn run_failed(error: RunError, context: &RunContext) -> Self {
        Self(ApplicationError::from(error).into_interface(context.correlation_id()))
    }

    fn internal(message: impl Into<String>, context: &RunContext) -> Self {
        Self(InterfaceError::Internal {
            message: message.into(),
            correlation_id: context.correlation_id(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            InterfaceError::BadRequest { message, .. } => {
                (StatusCode::BAD_REQUEST, ErrorBody { error: message.clone(), correlation_id: None })
            }
            other => {
                let status = match other {
                    InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    ErrorBody {
                        error: other.user_message().to_string(),
                        correlation_id: Some(other.correlation_id().to_string()),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/chat", post(chat))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AgentReply>, ApiError> {
    let context = RunContext::new();
    let mut saved: Option<UploadGuard> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::bad_request(format!("Invalid multipart body: {error}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = sanitize_file_name(field.file_name().unwrap_or_default());
        if file_name.is_empty() {
            return Err(ApiError::bad_request("No selected file"));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|error| ApiError::bad_request(format!("Could not read upload: {error}")))?;

        let guard = UploadGuard::new(
            state.upload_dir.join(format!("{}_{file_name}", context.run_id)),
            context.correlation_id(),
        );
        store_upload(&state.upload_dir, guard.path(), &bytes).await.map_err(|io_error| {
            error!(
                event_name = "server.upload.store_failed",
                correlation_id = %context.correlation_id(),
                error = %io_error,
                "could not store uploaded file"
            );
            ApiError::internal(io_error.to_string(), &context)
        })?;
        saved = Some(guard);
        break;
    }

    let Some(upload) = saved else {
        return Err(ApiError::bad_request("No file part"));
    };
    let path = upload.path();
    info!(
        event_name = "server.upload.received",
        correlation_id = %context.correlation_id(),
        path = %path.display(),
        "identity card uploaded"
    );

    let outcome = state
        .runtime
        .run_with_context(
            &state.fraud,
            fraud_entry_message(&path.to_string_lossy()),
            context.clone(),
        )
        .await;
    drop(upload);

    let outcome = outcome.map_err(|run_error| ApiError::run_failed(run_error, &context))?;
    let response = outcome.final_response().unwrap_or(UPLOAD_FALLBACK_RESPONSE).to_string();
    Ok(Json(AgentReply { response }))
}

pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<AgentReply>, ApiError> {
    let message = payload
        .ok()
        .and_then(|Json(request)| request.message)
        .ok_or_else(|| ApiError::bad_request("Invalid request: a JSON body with `message` is required"))?;

    let context = RunContext::new();
    let outcome = state
        .runtime
        .run_with_context(&state.chat, message, context.clone())
        .await
        .map_err(|run_error| ApiError::run_failed(run_error, &context))?;

    let response = outcome.final_response().unwrap_or(CHAT_FALLBACK_RESPONSE).to_string();
    Ok(Json(AgentReply { response }))
}

/// Owns a stored upload and removes it when dropped, including when the
/// request future is cancelled mid-run.
struct UploadGuard {
    path: PathBuf,
    correlation_id: String,
}

impl UploadGuard {
    fn new(path: PathBuf, correlation_id: String) -> Self {
        Self { path, correlation_id }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(io_error) if io_error.kind() == std::io::ErrorKind::NotFound => {}
            Err(io_error) => warn!(
                event_name = "server.upload.cleanup_failed",
                correlation_id = %self.correlation_id,
                path = %self.path.display(),
                error = %io_error,
                "could not remove uploaded file"
            ),
        }
    }
}

async fn store_upload(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, bytes).await
}

/// Keeps only the final path component and characters safe in a file name.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned = base
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') { ch } else { '_' })
        .collect::<String>();
    cleaned.trim_matches(|ch| ch == '.' || ch == '_').to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use idguard_agent::conversation::{Message, ToolCall};
    use idguard_agent::llm::{AssistantTurn, DecisionRequest, ImageInput, ModelClient, ModelError};
    use idguard_agent::notify::DisabledNotifier;
    use idguard_agent::vision::{AnalysisError, IdCardAnalyzer};
    use idguard_agent::{
        chat_workflow, fraud_workflow, AgentRuntime, GuardrailPolicy, RuntimeLimits,
        ToolDependencies,
    };
    use idguard_core::domain::identity::IdentityFields;
    use idguard_db::InMemoryIdentityRepository;

    use super::{router, sanitize_file_name, AgentReply, AppState, ErrorBody, CHAT_FALLBACK_RESPONSE};

    /// Answers with the entry message it was given, or fails when told to.
    struct EchoModel {
        fail: bool,
        delay: Duration,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelClient for EchoModel {
        fn model_id(&self) -> String {
            "echo".to_owned()
        }

        async fn decide(&self, request: DecisionRequest<'_>) -> Result<AssistantTurn, ModelError> {
            if self.fail {
                return Err(ModelError::Unavailable("connection refused".to_owned()));
            }
            tokio::time::sleep(self.delay).await;
            let entry = match request.messages.first() {
                Some(Message::User { content }) => content.clone(),
                _ => String::new(),
            };
            self.seen.lock().expect("seen lock").push(entry.clone());
            if entry == "silent" {
                return Ok(AssistantTurn { content: String::new(), tool_calls: Vec::<ToolCall>::new() });
            }
            Ok(AssistantTurn { content: format!("echo: {entry}"), tool_calls: Vec::new() })
        }

        async fn describe_image(&self, _prompt: &str, _image: &ImageInput) -> Result<String, ModelError> {
            Ok("{}".to_owned())
        }
    }

    struct NoAnalyzer;

    #[async_trait]
    impl IdCardAnalyzer for NoAnalyzer {
        async fn analyze(&self, _image: ImageInput) -> Result<IdentityFields, AnalysisError> {
            Err(AnalysisError::Unparseable)
        }
    }

    fn app(fail: bool, upload_dir: &std::path::Path) -> (axum::Router, Arc<EchoModel>) {
        app_with_delay(fail, Duration::ZERO, upload_dir)
    }

    fn app_with_delay(
        fail: bool,
        delay: Duration,
        upload_dir: &std::path::Path,
    ) -> (axum::Router, Arc<EchoModel>) {
        let model = Arc::new(EchoModel { fail, delay, seen: Mutex::new(Vec::new()) });
        let dependencies = ToolDependencies {
            identities: Arc::new(InMemoryIdentityRepository::default()),
            analyzer: Arc::new(NoAnalyzer),
            notifier: Arc::new(DisabledNotifier::new("tests")),
        };
        let state = AppState {
            runtime: AgentRuntime::new(
                model.clone(),
                RuntimeLimits { max_turns: 4, decision_timeout: Duration::from_secs(5), tool_timeout: Duration::from_secs(5) },
            ),
            fraud: Arc::new(
                fraud_workflow(&dependencies, GuardrailPolicy::duplicate_notification()).expect("fraud"),
            ),
            chat: Arc::new(chat_workflow(&dependencies).expect("chat")),
            upload_dir: upload_dir.to_path_buf(),
        };
        (router(state, 16 * 1024 * 1024), model)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn chat_request(body: &str) -> Request<Body> {
        Request::post("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .expect("request")
    }

    fn multipart_request(field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
        let boundary = "idguard-test-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::post("/upload")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn chat_returns_final_response() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (app, _) = app(false, dir.path());

        let response = app.oneshot(chat_request(r#"{"message": "halo"}"#)).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let reply: AgentReply = body_json(response).await;
        assert_eq!(reply.response, "echo: halo");
    }

    #[tokio::test]
    async fn chat_without_final_text_uses_fallback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (app, _) = app(false, dir.path());

        let response = app.oneshot(chat_request(r#"{"message": "silent"}"#)).await.expect("response");

        let reply: AgentReply = body_json(response).await;
        assert_eq!(reply.response, CHAT_FALLBACK_RESPONSE);
    }

    #[tokio::test]
    async fn chat_without_message_is_bad_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (app, _) = app(false, dir.path());

        let response = app.oneshot(chat_request(r#"{"text": "halo"}"#)).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = body_json(response).await;
        assert!(body.error.contains("message"));
    }

    #[tokio::test]
    async fn model_outage_is_a_service_error_not_the_fallback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (app, _) = app(true, dir.path());

        let response = app.oneshot(chat_request(r#"{"message": "halo"}"#)).await.expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: ErrorBody = body_json(response).await;
        assert_ne!(body.error, CHAT_FALLBACK_RESPONSE);
        assert!(body.correlation_id.is_some());
    }

    #[tokio::test]
    async fn upload_runs_fraud_pipeline_and_removes_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (app, model) = app(false, dir.path());

        let response = app
            .oneshot(multipart_request("file", "../ktp scan.jpg", &[0xFF, 0xD8, 0xFF, 0xE0]))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let reply: AgentReply = body_json(response).await;
        assert!(reply.response.starts_with("echo: Analyze the ID card image located at: "));
        assert!(reply.response.ends_with("_ktp_scan.jpg"));

        let seen = model.seen.lock().expect("seen lock").clone();
        assert_eq!(seen.len(), 1);
        let leftover = std::fs::read_dir(dir.path()).expect("read dir").count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn cancelled_upload_request_still_removes_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (app, model) = app_with_delay(false, Duration::from_secs(3), dir.path());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(200),
            app.oneshot(multipart_request("file", "ktp.jpg", &[0xFF, 0xD8, 0xFF, 0xE0])),
        )
        .await;

        assert!(abandoned.is_err(), "the request should still be waiting on the model");
        assert!(model.seen.lock().expect("seen lock").is_empty());
        let leftover = std::fs::read_dir(dir.path()).expect("read dir").count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn upload_without_file_part_is_bad_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (app, _) = app(false, dir.path());

        let response =
            app.oneshot(multipart_request("image", "card.jpg", b"abc")).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.error, "No file part");
    }

    #[test]
    fn file_names_are_reduced_to_a_safe_base_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\KTP 01.png"), "KTP_01.png");
        assert_eq!(sanitize_file_name(""), "");
        assert_eq!(sanitize_file_name("..."), "");
    }
}
