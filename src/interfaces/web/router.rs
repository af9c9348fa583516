use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use super::AppState;
use super::handlers::install;

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/install_async", post(install::install_async_endpoint))
        .route("/api/install", post(install::install_endpoint))
        .route(
            "/api/install_progress",
            get(install::install_progress_endpoint),
        )
        .route("/api/install_choose", post(install::install_choose_endpoint))
        .route("/api/jobs", get(install::list_jobs_endpoint))
        .route(
            "/api/fixpermissions",
            post(install::fix_permissions_endpoint),
        )
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(build_cors())
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::jobs::InMemoryJobStore;
    use crate::core::pipeline::{Installer, PipelineSettings};
    use crate::core::process::{CommandRunner, CommandSpec, ProcessOutput};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedSender;
    use tower::util::ServiceExt;

    /// Every command succeeds with the same stdout.
    struct FixedRunner {
        stdout: String,
    }

    #[async_trait]
    impl CommandRunner for FixedRunner {
        async fn run(&self, _spec: &CommandSpec) -> std::io::Result<ProcessOutput> {
            Ok(ProcessOutput {
                code: Some(0),
                stdout: self.stdout.clone(),
                stderr: String::new(),
            })
        }

        async fn run_streaming(
            &self,
            spec: &CommandSpec,
            _lines: UnboundedSender<String>,
        ) -> std::io::Result<ProcessOutput> {
            self.run(spec).await
        }
    }

    fn state_with_output(stdout: &str) -> AppState {
        let mut config = Config::default();
        config.remote.base_dir = "/data/images/qemu".into();
        let installer = Installer::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(FixedRunner {
                stdout: stdout.to_string(),
            }),
            PipelineSettings::from_config(&config),
        );
        let (log_tx, _) = tokio::sync::broadcast::channel(16);
        AppState { installer, log_tx }
    }

    fn empty_state() -> AppState {
        state_with_output("")
    }

    async fn json_request(
        app: Router,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };

        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&body_bytes).unwrap_or(serde_json::json!({}));
        (status, json)
    }

    async fn wait_for_terminal(state: &AppState, job_id: &str) -> serde_json::Value {
        for _ in 0..50 {
            let (status, json) = json_request(
                build_api_router(state.clone()),
                Method::GET,
                &format!("/api/install_progress?job_id={job_id}"),
                None,
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            let job_status = json["job"]["status"].as_str().unwrap_or_default().to_string();
            if matches!(job_status.as_str(), "success" | "error" | "needs_input") {
                return json["job"].clone();
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never settled");
    }

    #[tokio::test]
    async fn security_headers_present_on_responses() {
        let app = build_api_router(empty_state());
        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/jobs")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(
            resp.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn install_async_requires_type_and_id() {
        let app = build_api_router(empty_state());
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/install_async",
            Some(serde_json::json!({ "type": "qemu" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert!(json["message"].as_str().is_some());
    }

    #[tokio::test]
    async fn install_async_rejects_partial_credentials() {
        let app = build_api_router(empty_state());
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/install_async",
            Some(serde_json::json!({ "type": "qemu", "id": 7, "eve_ip": "10.0.0.5" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn install_async_then_poll_to_success() {
        let state = state_with_output("Path: /data/images/qemu/vyos\n");
        let (status, json) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/install_async",
            Some(serde_json::json!({ "type": "QEMU", "id": "812", "name": "vyos" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let job = wait_for_terminal(&state, &job_id).await;
        assert_eq!(job["status"], "success");
        assert_eq!(job["phase"], "done");
        assert_eq!(job["type"], "qemu");
        assert_eq!(job["id"], "812");
    }

    #[tokio::test]
    async fn needs_input_job_exposes_choices_and_accepts_choice() {
        let state = state_with_output("Path: /data/images/qemu/genericbox\n");
        let (_, json) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/install_async",
            Some(serde_json::json!({
                "type": "qemu",
                "id": 3,
                "name": "genericbox",
                "eve_ip": "10.0.0.5",
                "eve_user": "root",
                "eve_pass": "eve"
            })),
        )
        .await;
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let job = wait_for_terminal(&state, &job_id).await;
        assert_eq!(job["status"], "needs_input");
        assert_eq!(job["suggested"], "genericbox-genericbox");
        assert_eq!(job["eve_ip"], "10.0.0.5");
        assert!(job.get("eve_pass").is_none());

        let (status, json) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/install_choose",
            Some(serde_json::json!({ "job_id": job_id, "name": "genericbox" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);

        let (status, json) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/install_choose",
            Some(serde_json::json!({ "job_id": job_id, "name": "genericbox-genericbox" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);

        let job = wait_for_terminal(&state, &job_id).await;
        assert_eq!(job["status"], "success");
        assert_eq!(job["progress"], 100);
    }

    #[tokio::test]
    async fn blocking_choose_returns_final_snapshot() {
        let state = state_with_output("Path: /data/images/qemu/genericbox\n");
        let (_, json) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/install",
            Some(serde_json::json!({
                "type": "qemu",
                "id": 3,
                "name": "genericbox",
                "eve_ip": "10.0.0.5",
                "eve_user": "root",
                "eve_pass": "eve"
            })),
        )
        .await;
        assert_eq!(json["job"]["status"], "needs_input");
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let (status, json) = json_request(
            build_api_router(state),
            Method::POST,
            "/api/install_choose",
            Some(serde_json::json!({
                "job_id": job_id,
                "name": "genericbox-genericbox",
                "wait": true
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["job_id"], job_id.as_str());
        assert_eq!(json["job"]["status"], "success");
        assert_eq!(json["job"]["progress"], 100);
    }

    #[tokio::test]
    async fn blocking_install_returns_final_snapshot() {
        let state = state_with_output("Path: /data/images/qemu/vyos\n");
        let (status, json) = json_request(
            build_api_router(state),
            Method::POST,
            "/api/install",
            Some(serde_json::json!({ "type": "qemu", "id": "1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["job"]["status"], "success");
    }

    #[tokio::test]
    async fn progress_for_unknown_job_is_404() {
        let app = build_api_router(empty_state());
        let (status, json) = json_request(
            app,
            Method::GET,
            "/api/install_progress?job_id=missing",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn progress_without_job_id_is_400() {
        let app = build_api_router(empty_state());
        let (status, _) = json_request(app, Method::GET, "/api/install_progress", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn choose_on_finished_job_is_conflict() {
        let state = state_with_output("");
        let (_, json) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/install",
            Some(serde_json::json!({ "type": "qemu", "id": "1" })),
        )
        .await;
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let (status, json) = json_request(
            build_api_router(state),
            Method::POST,
            "/api/install_choose",
            Some(serde_json::json!({ "job_id": job_id, "name": "a-b" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn jobs_lists_created_jobs() {
        let state = state_with_output("");
        for id in ["1", "2"] {
            json_request(
                build_api_router(state.clone()),
                Method::POST,
                "/api/install",
                Some(serde_json::json!({ "type": "qemu", "id": id })),
            )
            .await;
        }
        let (status, json) = json_request(build_api_router(state), Method::GET, "/api/jobs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["jobs"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fixpermissions_requires_credentials() {
        let app = build_api_router(empty_state());
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/fixpermissions",
            Some(serde_json::json!({ "eve_ip": "10.0.0.5" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn fixpermissions_reports_command_output() {
        let app = build_api_router(state_with_output("ok\n"));
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/fixpermissions",
            Some(serde_json::json!({
                "eve_ip": "10.0.0.5",
                "eve_user": "root",
                "eve_pass": "eve"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["stdout"], "ok\n");
    }
}
