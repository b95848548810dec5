use serde_json::json;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TASKS_PATH: &str = "/task-management-api/v1/locations/loc-1/tasks";

fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("taskscope-{nanos}-{name}"))
}

fn run(server: &MockServer, store: &PathBuf, args: &[&str]) -> Output {
    let base_url = format!("base_url={}", server.uri());
    Command::new(env!("CARGO_BIN_EXE_taskscope"))
        .args(args)
        .args(["--config-override", base_url.as_str()])
        .env("TASKSCOPE_TOKEN", "token-1")
        .env("TASKSCOPE_LOCATION_ID", "loc-1")
        .env("TASKSCOPE_ACTOR_ID", "staff-1")
        .env("TASKSCOPE_STORE_DIR", store)
        .env("TASKSCOPE_CONFIG_PATH", store.join("missing-config.json"))
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run taskscope")
}

async fn serve_tasks(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(TASKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "_id": "t1",
                "name": "Call Ann",
                "type": "Call",
                "status": "OVERDUE",
                "notes": "ask about renewal",
                "due_date": 1_700_000_000,
                "customer_id": "c1",
                "customer_first_name": "Ann",
                "customer_last_name": "Lee",
                "staff_id": "staff-9"
            }
        ])))
        .mount(server)
        .await;
}

fn body_of(request: &wiremock::Request) -> serde_json::Value {
    serde_json::from_slice(&request.body).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn edit_sends_one_static_update() {
    let server = MockServer::start().await;
    serve_tasks(&server).await;
    Mock::given(method("PATCH"))
        .and(path(format!("{TASKS_PATH}/t1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;
    let store = temp_path("edit-static");

    let output = run(&server, &store, &["edit", "t1", "--name", "Call Ann back"]);
    std::fs::remove_dir_all(&store).ok();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Updated task: Call Ann back (t1)"));

    let requests = server.received_requests().await.unwrap();
    let update = requests
        .iter()
        .find(|request| request.method.as_str() == "PATCH")
        .unwrap();
    let body = body_of(update);
    assert_eq!(body["name"], "Call Ann back");
    assert_eq!(body["type"], "Call");
    assert_eq!(body["notes"], "ask about renewal");
    // The existing due day is resent as the end of that day.
    assert!(body["due_date"].as_i64().unwrap() >= 1_700_000_000);
    assert_eq!(body["customer_id"], "c1");
    assert_eq!(body["staff_id"], "staff-1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn edit_with_blank_name_never_calls_the_service() {
    let server = MockServer::start().await;
    serve_tasks(&server).await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let store = temp_path("edit-blank");

    let output = run(&server, &store, &["edit", "t1", "--name", "   "]);
    std::fs::remove_dir_all(&store).ok();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: invalid_input"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn edit_surfaces_remote_rejection() {
    let server = MockServer::start().await;
    serve_tasks(&server).await;
    Mock::given(method("PATCH"))
        .and(path(format!("{TASKS_PATH}/t1")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "TASKS_CORE_API_STAFF_DELETED",
            "message": "staff deleted"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let store = temp_path("edit-rejected");

    let output = run(&server, &store, &["edit", "t1", "--notes", "new notes"]);
    std::fs::remove_dir_all(&store).ok();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: remote_rejected"));
    assert!(stderr.contains("actor_id=staff-1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_completes_the_task() {
    let server = MockServer::start().await;
    serve_tasks(&server).await;
    Mock::given(method("PATCH"))
        .and(path(format!("{TASKS_PATH}/t1/completion")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;
    let store = temp_path("delete");

    let output = run(&server, &store, &["delete", "t1"]);
    std::fs::remove_dir_all(&store).ok();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Deleted task: Call Ann (t1)"));

    let requests = server.received_requests().await.unwrap();
    let completion = requests
        .iter()
        .find(|request| request.method.as_str() == "PATCH")
        .unwrap();
    let body = body_of(completion);
    assert_eq!(body["_id"], "t1");
    assert_eq!(body["location_id"], "loc-1");
    assert_eq!(body["completed_by"], "staff-1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_of_unknown_task_is_invalid_input() {
    let server = MockServer::start().await;
    serve_tasks(&server).await;
    let store = temp_path("delete-unknown");

    let output = run(&server, &store, &["delete", "nope"]);
    std::fs::remove_dir_all(&store).ok();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: invalid_input"));
}
