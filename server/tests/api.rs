//! End-to-end HTTP surface tests (§6, §8): drives `build_router` with an
//! in-memory `AppState` and a scripted [`FakeLlmClient`], the way
//! `codex-rs/mcp-server/tests` drives the MCP server process-level
//! rather than unit-testing individual handlers.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::body::to_bytes;
use axum::http::Request;
use axum::http::StatusCode;
use backend_agent::LlmChunk;
use backend_agent::fake_llm::FakeLlmClient;
use backend_agent::fake_llm::ScriptedTurn;
use backend_server::build_router;
use backend_server::state::AppState;
use serde_json::Value;
use serde_json::json;
use tower::ServiceExt;

async fn test_app(llm: FakeLlmClient) -> (Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = dir.path().join("workspaces");
    let shared = dir.path().join("shared");
    let state = AppState::build_for_test(Arc::new(llm), workspace, shared, 50 * 1024 * 1024).await;
    (build_router(state), dir)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .expect("read body");
    String::from_utf8_lossy(&bytes).into_owned()
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

fn get_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .expect("request")
}

/// Registers a fresh user and returns `(user_id, bearer_token)`.
async fn register_and_login(app: &Router, username: &str) -> (String, String) {
    let register = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            None,
            json!({ "username": username, "password": "hunter2" }),
        ))
        .await
        .expect("register request");
    assert_eq!(register.status(), StatusCode::OK);
    let register_body = body_json(register).await;
    let user_id = register_body["user_id"].as_str().expect("user_id").to_string();

    let login = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            None,
            json!({ "username": username, "password": "hunter2" }),
        ))
        .await
        .expect("login request");
    assert_eq!(login.status(), StatusCode::OK);
    let login_body = body_json(login).await;
    let token = login_body["access_token"].as_str().expect("access_token").to_string();
    (user_id, token)
}

async fn create_session(app: &Router, token: &str) -> String {
    let resp = app
        .clone()
        .oneshot(json_request("POST", "/sessions", Some(token), json!({})))
        .await
        .expect("create session");
    assert_eq!(resp.status(), StatusCode::OK);
    body_json(resp).await["thread_id"].as_str().expect("thread_id").to_string()
}

/// Parses a raw SSE byte stream into `(event_name, data_json)` pairs, in
/// wire order.
fn parse_sse(raw: &str) -> Vec<(String, Value)> {
    raw.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let mut event = String::new();
            let mut data = String::new();
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    event = rest.to_string();
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    data = rest.to_string();
                }
            }
            (event, serde_json::from_str(&data).unwrap_or(Value::Null))
        })
        .collect()
}

/// (P1, S1) A user's bearer token cannot touch another user's thread;
/// the mismatch yields exactly 403 and no agent turn is ever driven.
#[tokio::test(flavor = "multi_thread")]
async fn cross_user_chat_is_forbidden() {
    let (app, _dir) = test_app(FakeLlmClient::new(vec![])).await;
    let (_, alice_token) = register_and_login(&app, "alice").await;
    let (_, bob_token) = register_and_login(&app, "bob").await;
    let thread_id = create_session(&app, &alice_token).await;

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/chat/{thread_id}"),
            Some(&bob_token),
            json!({ "message": "hello" }),
        ))
        .await
        .expect("chat request");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

/// (P4, S2) A build-mode turn that writes a file never surfaces the
/// write as an `interrupt` frame (it's auto-approved) and always ends
/// with exactly one terminal `end` frame.
#[tokio::test(flavor = "multi_thread")]
async fn build_mode_auto_approves_write_tool_and_terminates_once() {
    let llm = FakeLlmClient::new(vec![
        ScriptedTurn::new(vec![
            LlmChunk::Token("creating hello.py".into()),
            LlmChunk::Interrupted {
                call_id: "call-1".into(),
                name: "write_file".into(),
                args: json!({ "path": "hello.py", "content": "print('hi')" }),
            },
        ]),
        ScriptedTurn::new(vec![LlmChunk::Token("done".into()), LlmChunk::Done]),
    ]);
    let (app, _dir) = test_app(llm).await;
    let (_, token) = register_and_login(&app, "carol").await;
    let thread_id = create_session(&app, &token).await;

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/chat/{thread_id}"),
            Some(&token),
            json!({ "message": "create hello.py with print('hi')" }),
        ))
        .await
        .expect("chat request");
    assert_eq!(resp.status(), StatusCode::OK);
    let frames = parse_sse(&body_text(resp).await);

    assert!(frames.iter().any(|(name, _)| name == "messages/partial"));
    assert!(
        !frames.iter().any(|(name, _)| name == "interrupt"),
        "auto-approved write tool must never surface as an interrupt"
    );
    assert_eq!(frames.last().map(|(name, _)| name.as_str()), Some("end"));
    assert_eq!(frames.iter().filter(|(name, _)| name == "end").count(), 1);
}

/// (§4.3 step 5) The same write tool in plan mode is rejected instead of
/// auto-approved, and the turn ends in error.
#[tokio::test(flavor = "multi_thread")]
async fn plan_mode_rejects_write_tool() {
    let llm = FakeLlmClient::new(vec![ScriptedTurn::new(vec![
        LlmChunk::Token("planning".into()),
        LlmChunk::Interrupted {
            call_id: "call-1".into(),
            name: "write_file".into(),
            args: json!({ "path": "hello.py", "content": "print('hi')" }),
        },
    ])]);
    let (app, _dir) = test_app(llm).await;
    let (_, token) = register_and_login(&app, "dave").await;
    let thread_id = create_session(&app, &token).await;

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/chat/{thread_id}"),
            Some(&token),
            json!({ "message": "write a file", "mode": "plan" }),
        ))
        .await
        .expect("chat request");
    assert_eq!(resp.status(), StatusCode::OK);
    let frames = parse_sse(&body_text(resp).await);

    assert!(frames.iter().any(|(name, _)| name == "error"));
    assert_eq!(frames.last().map(|(name, _)| name.as_str()), Some("end"));
}

/// (R5) Cancelling a suspended `ask_user` interrupt leaves the thread
/// idle with no pending tasks.
#[tokio::test(flavor = "multi_thread")]
async fn resume_cancel_clears_pending_interrupt() {
    let llm = FakeLlmClient::new(vec![
        ScriptedTurn::new(vec![
            LlmChunk::Token("need info".into()),
            LlmChunk::Interrupted {
                call_id: "call-1".into(),
                name: "ask_user".into(),
                args: json!({ "questions": ["which color?"] }),
            },
        ]),
        ScriptedTurn::new(vec![LlmChunk::Token("ok cancelling".into()), LlmChunk::Done]),
    ]);
    let (app, _dir) = test_app(llm).await;
    let (_, token) = register_and_login(&app, "erin").await;
    let thread_id = create_session(&app, &token).await;

    let first = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/chat/{thread_id}"),
            Some(&token),
            json!({ "message": "do something that needs a question" }),
        ))
        .await
        .expect("chat request");
    let first_frames = parse_sse(&body_text(first).await);
    assert!(first_frames.iter().any(|(name, _)| name == "interrupt"));

    let status_before = app
        .clone()
        .oneshot(get_request(&format!("/status/{thread_id}"), &token))
        .await
        .expect("status request");
    let status_before = body_json(status_before).await;
    assert_eq!(status_before["status"], json!("interrupted"));
    assert_eq!(status_before["has_pending_tasks"], json!(true));

    let resume = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/resume/{thread_id}"),
            Some(&token),
            json!({ "action": "cancel" }),
        ))
        .await
        .expect("resume request");
    assert_eq!(resume.status(), StatusCode::OK);
    let resume_frames = parse_sse(&body_text(resume).await);
    assert_eq!(resume_frames.last().map(|(name, _)| name.as_str()), Some("end"));

    let status_after = app
        .clone()
        .oneshot(get_request(&format!("/status/{thread_id}"), &token))
        .await
        .expect("status request");
    let status_after = body_json(status_after).await;
    assert_eq!(status_after["status"], json!("idle"));
    assert_eq!(status_after["has_pending_tasks"], json!(false));
}

fn multipart_body(boundary: &str, fields: &[(&str, &str)], file: (&str, &str, &[u8])) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes());
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    let (field_name, filename, contents) = file;
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field_name}\"; filename=\"{filename}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/zip\r\n\r\n");
    body.extend_from_slice(contents);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

/// (§6, §7) `/admin/*` routes require `is_admin`; a freshly registered
/// user is rejected with 403 even with a valid token.
#[tokio::test(flavor = "multi_thread")]
async fn admin_routes_reject_non_admin_user() {
    let (app, _dir) = test_app(FakeLlmClient::new(vec![])).await;
    let (_, token) = register_and_login(&app, "frank").await;

    // AdminUser is extracted before the multipart body is ever read, so
    // a non-admin caller is rejected before the upload content matters
    // (not a real zip archive).
    let fake_archive: &[u8] = b"not actually a zip file";
    let boundary = "XBOUNDARYX";
    let body = multipart_body(boundary, &[("name", "demo")], ("file", "demo.zip", fake_archive));
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/skills/upload")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(body))
                .expect("request"),
        )
        .await
        .expect("upload request");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

/// (R1, R2, S6) PUT/GET round-trips bytes exactly; a PUT with a stale
/// `If-Match` is rejected with 409 and leaves the file untouched.
#[tokio::test(flavor = "multi_thread")]
async fn webdav_put_get_and_etag_conflict() {
    let (app, _dir) = test_app(FakeLlmClient::new(vec![])).await;
    let (_, token) = register_and_login(&app, "grace").await;

    let put_a = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/dav/f.txt")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::from("A"))
                .expect("request"),
        )
        .await
        .expect("put a");
    assert_eq!(put_a.status(), StatusCode::CREATED);
    let etag = put_a
        .headers()
        .get("etag")
        .expect("etag header")
        .to_str()
        .expect("etag utf8")
        .to_string();

    let get_a = app
        .clone()
        .oneshot(get_request("/dav/f.txt", &token))
        .await
        .expect("get a");
    assert_eq!(get_a.status(), StatusCode::OK);
    assert_eq!(body_text(get_a).await, "A");

    let stale_put = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/dav/f.txt")
                .header("authorization", format!("Bearer {token}"))
                .header("if-match", "\"wrong\"")
                .body(Body::from("B"))
                .expect("request"),
        )
        .await
        .expect("stale put");
    assert_eq!(stale_put.status(), StatusCode::CONFLICT);

    let get_still_a = app
        .clone()
        .oneshot(get_request("/dav/f.txt", &token))
        .await
        .expect("get still a");
    assert_eq!(body_text(get_still_a).await, "A");

    let fresh_put = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/dav/f.txt")
                .header("authorization", format!("Bearer {token}"))
                .header("if-match", etag)
                .body(Body::from("B"))
                .expect("request"),
        )
        .await
        .expect("fresh put");
    assert_eq!(fresh_put.status(), StatusCode::CREATED);

    let get_b = app
        .clone()
        .oneshot(get_request("/dav/f.txt", &token))
        .await
        .expect("get b");
    assert_eq!(body_text(get_b).await, "B");
}

/// (B3) PROPFIND on a path that doesn't exist is 404; MKCOL over an
/// existing path is 405.
#[tokio::test(flavor = "multi_thread")]
async fn webdav_boundary_status_codes() {
    let (app, _dir) = test_app(FakeLlmClient::new(vec![])).await;
    let (_, token) = register_and_login(&app, "heidi").await;

    let propfind_missing = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PROPFIND")
                .uri("/dav/missing.txt")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("propfind missing");
    assert_eq!(propfind_missing.status(), StatusCode::NOT_FOUND);

    let mkcol_first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("MKCOL")
                .uri("/dav/dir")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("mkcol first");
    assert_eq!(mkcol_first.status(), StatusCode::CREATED);

    let mkcol_again = app
        .clone()
        .oneshot(
            Request::builder()
                .method("MKCOL")
                .uri("/dav/dir")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("mkcol again");
    assert_eq!(mkcol_again.status(), StatusCode::METHOD_NOT_ALLOWED);
}

fn multipart_upload_chunk(boundary: &str, upload_id: &str, chunk_index: i64, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"upload_id\"\r\n\r\n");
    body.extend_from_slice(upload_id.as_bytes());
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"chunk_index\"\r\n\r\n");
    body.extend_from_slice(chunk_index.to_string().as_bytes());
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"chunk\"; filename=\"chunk.bin\"\r\n");
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

/// (S5, R3) Chunks uploaded out of order are merged back in index order;
/// re-sending the same chunk is idempotent.
#[tokio::test(flavor = "multi_thread")]
async fn chunk_upload_reorders_and_is_idempotent() {
    let (app, _dir) = test_app(FakeLlmClient::new(vec![])).await;
    let (_, token) = register_and_login(&app, "ivan").await;

    let init = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/files/init-upload",
            Some(&token),
            json!({ "filename": "payload.bin", "total_chunks": 3, "total_size": 30 }),
        ))
        .await
        .expect("init upload");
    assert_eq!(init.status(), StatusCode::OK);
    let upload_id = body_json(init).await["upload_id"].as_str().expect("upload_id").to_string();

    let chunks: [[u8; 10]; 3] = [[0u8; 10], [1u8; 10], [2u8; 10]];
    for &index in &[2i64, 0, 1, 0] {
        let boundary = "CHUNKBOUNDARY";
        let body = multipart_upload_chunk(boundary, &upload_id, index, &chunks[index as usize]);
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/files/upload-chunk")
                    .header("authorization", format!("Bearer {token}"))
                    .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("upload chunk");
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let complete = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/files/complete-upload",
            Some(&token),
            json!({ "upload_id": upload_id, "target_path": "payload.bin" }),
        ))
        .await
        .expect("complete upload");
    assert_eq!(complete.status(), StatusCode::OK);
    let path = body_json(complete).await["path"].as_str().expect("path").to_string();

    let merged = tokio::fs::read(&path).await.expect("read merged file");
    let mut expected = Vec::new();
    expected.extend_from_slice(&chunks[0]);
    expected.extend_from_slice(&chunks[1]);
    expected.extend_from_slice(&chunks[2]);
    assert_eq!(merged, expected);
}

/// (B2) A chunk index outside `[0, total_chunks)` is rejected with 400.
#[tokio::test(flavor = "multi_thread")]
async fn chunk_upload_rejects_out_of_range_index() {
    let (app, _dir) = test_app(FakeLlmClient::new(vec![])).await;
    let (_, token) = register_and_login(&app, "judy").await;

    let init = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/files/init-upload",
            Some(&token),
            json!({ "filename": "payload.bin", "total_chunks": 2, "total_size": 20 }),
        ))
        .await
        .expect("init upload");
    let upload_id = body_json(init).await["upload_id"].as_str().expect("upload_id").to_string();

    let boundary = "BADCHUNK";
    let body = multipart_upload_chunk(boundary, &upload_id, 5, &[0u8; 10]);
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/files/upload-chunk")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(body))
                .expect("request"),
        )
        .await
        .expect("upload chunk");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
