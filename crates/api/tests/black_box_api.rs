use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use fanout_api::app::{AppServices, build_app};
use fanout_core::TenantId;
use fanout_executions::NewExecution;
use fanout_infra::{DryRunDeliverer, FanoutConfig, WorkerPoolHandle};

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    pool: Option<WorkerPoolHandle>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let mut config = FanoutConfig::default();
        config.tenants = vec!["ACME".into(), "GLOBEX".into()];
        config.pool.workers = 1;
        config.pool.wait_time = Duration::from_millis(50);
        config.pool.shutdown_timeout = Duration::from_secs(1);

        let services = Arc::new(AppServices::in_memory(&config));
        let pool = services.spawn_workers(&config, Arc::new(DryRunDeliverer));

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(Arc::clone(&services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            pool: Some(pool),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        self.services.shutdown.trigger_abandon();
        drop(self.pool.take());
    }
}

async fn query_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    filter: serde_json::Value,
    expected: usize,
) -> Vec<serde_json::Value> {
    // Processing is asynchronous (queue -> worker -> registry). Poll briefly.
    for _ in 0..200 {
        let res = client
            .post(srv.url("/executions/query"))
            .json(&filter)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Vec<serde_json::Value> = res.json().await.unwrap();
        if body.len() >= expected {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("executions did not appear within timeout");
}

#[tokio::test]
async fn health_reports_ready_once_workers_run() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["inFlight"], 0);
}

#[tokio::test]
async fn health_turns_unavailable_while_draining() {
    let srv = TestServer::spawn().await;
    srv.services.shutdown.trigger_shutdown();

    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "draining");
}

#[tokio::test]
async fn distribution_lifecycle_enqueue_process_query() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/distributions"))
        .json(&json!({
            "changeId": "CHG-100",
            "title": "Maintenance window",
            "customerCodes": ["ACME", "GLOBEX"],
            "templateId": "tpl-maintenance",
            "priority": "high"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["messageId"].as_str().is_some());

    let executions = query_eventually(
        &client,
        &srv,
        json!({ "changeId": "CHG-100", "status": ["completed"] }),
        1,
    )
    .await;
    let execution = &executions[0];
    assert_eq!(execution["totalTenants"], 2);
    assert_eq!(execution["priority"], "high");

    let id = execution["id"].as_str().unwrap();
    let res = client
        .get(srv.url(&format!("/executions/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let fetched: serde_json::Value = res.json().await.unwrap();
    assert_eq!(fetched["status"], "completed");
    assert_eq!(fetched["tenantExecutions"]["ACME"]["status"], "completed");
    assert_eq!(fetched["metrics"]["totalEmailsSent"], 2);

    let res = client.get(srv.url("/metrics/workers")).send().await.unwrap();
    let workers: serde_json::Value = res.json().await.unwrap();
    assert_eq!(workers["processed"], 1);
    assert_eq!(workers["succeeded"], 1);
}

#[tokio::test]
async fn unknown_tenant_is_dead_lettered_not_executed() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/distributions"))
        .json(&json!({
            "changeId": "CHG-BOGUS",
            "title": "Nope",
            "customerCodes": ["bogus"],
            "templateId": "tpl"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let mut dead_lettered = 0;
    for _ in 0..200 {
        let res = client.get(srv.url("/metrics/workers")).send().await.unwrap();
        let workers: serde_json::Value = res.json().await.unwrap();
        dead_lettered = workers["deadLettered"].as_u64().unwrap();
        if dead_lettered == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(dead_lettered, 1);
    assert_eq!(srv.services.queue.dead_letters().len(), 1);

    let res = client
        .post(srv.url("/executions/query"))
        .json(&json!({ "changeId": "CHG-BOGUS" }))
        .send()
        .await
        .unwrap();
    let body: Vec<serde_json::Value> = res.json().await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn malformed_distribution_is_rejected_at_the_edge() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/distributions"))
        .header("content-type", "application/json")
        .body(r#"{"title":"missing change id"}"#)
        .send()
        .await
        .unwrap();
    assert!(res.status().is_client_error());
    assert!(srv.services.queue.is_empty());
}

#[tokio::test]
async fn execution_lookup_errors_are_json() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/executions/not-a-uuid")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");

    let res = client
        .get(srv.url("/executions/01890a5d-ac96-774b-bcce-b302099a8057"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
    assert!(body["message"].as_str().is_some());
}

#[tokio::test]
async fn cancel_is_rejected_once_terminal() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let execution = srv
        .services
        .registry
        .start_execution(NewExecution::new(
            "CHG-CANCEL",
            "Cancel me",
            "",
            "operator",
            vec![TenantId::new("ACME").unwrap()],
        ))
        .await
        .unwrap();

    let res = client
        .post(srv.url(&format!("/executions/{}/cancel", execution.id)))
        .json(&json!({ "reason": "wrong template" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["tenantExecutions"]["ACME"]["status"], "skipped");

    let res = client
        .post(srv.url(&format!("/executions/{}/cancel", execution.id)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn breaker_and_error_metrics_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/circuit-breakers")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let breakers: Vec<serde_json::Value> = res.json().await.unwrap();
    assert!(breakers.is_empty());

    let res = client
        .post(srv.url("/circuit-breakers/ACME/reset"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.get(srv.url("/metrics/errors")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let errors: serde_json::Value = res.json().await.unwrap();
    assert_eq!(errors["totalErrors"], 0);
    assert_eq!(errors["breakerTrips"], 0);
}
