use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use rtm_core::{
    Connection, ConnectionRegistry, EngineConfig, GatewayError, InMemorySource, Iteration,
    LinkedRef, SourceFactory, TimeFrame, WorkItem, WorkItemSource,
};
use rtm_server::{build_router, AppState};

/// Serves the fixture project for every connection except project "Locked",
/// whose backend rejects the credentials
struct FixtureFactory {
    source: Arc<InMemorySource>,
}

impl SourceFactory for FixtureFactory {
    fn connect(&self, connection: &Connection) -> Result<Arc<dyn WorkItemSource>, GatewayError> {
        if connection.project == "Locked" {
            let locked: Arc<dyn WorkItemSource> = Arc::new(
                InMemorySource::new("Locked").with_failure(100, GatewayError::Unauthorized(401)),
            );
            return Ok(locked);
        }
        let source: Arc<dyn WorkItemSource> = self.source.clone();
        Ok(source)
    }
}

fn iteration(name: &str, time_frame: TimeFrame) -> Iteration {
    Iteration {
        id: name.to_lowercase(),
        name: name.to_string(),
        path: format!("Shop\\{}", name),
        start_date: None,
        finish_date: None,
        time_frame,
    }
}

fn fixture_source() -> InMemorySource {
    let story = |id: u64, title: &str, criteria: &str| {
        WorkItem::new(id)
            .with_field("System.WorkItemType", "User Story")
            .with_field("System.Title", title)
            .with_field("System.AreaPath", "Shop\\Accounts")
            .with_field("Microsoft.VSTS.Common.AcceptanceCriteria", criteria)
    };

    InMemorySource::new("Shop")
        .with_links(
            story(100, "Login", "<ul><li>can log in</li><li>can log out</li></ul>"),
            vec![LinkedRef::tested_by(501)],
        )
        .with_item(
            WorkItem::new(501)
                .with_field("System.WorkItemType", "Test Case")
                .with_field("System.Title", "Valid login")
                .with_field("System.State", "Closed")
                .with_field("Custom.ACCriteria", 1),
        )
        .with_item(story(200, "Export report", ""))
        .with_iteration(iteration("Sprint 2", TimeFrame::Current))
        .with_iteration(iteration("Sprint 3", TimeFrame::Future))
        .with_query_result("'Shop\\Sprint 2'", vec![100, 200])
}

async fn spawn_app() -> String {
    let state = AppState::new(
        ConnectionRegistry::open_in_memory().unwrap(),
        Arc::new(FixtureFactory {
            source: Arc::new(fixture_source()),
        }),
        EngineConfig::default(),
        Duration::from_secs(10),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, build_router(state)).await.unwrap() });
    format!("http://{}", addr)
}

fn connection_body(name: &str, project: &str) -> Value {
    json!({
        "name": name,
        "orgUrl": "https://dev.azure.com/contoso",
        "project": project,
        "token": "secret-token-1234",
        "makeDefault": true,
    })
}

async fn create_connection(client: &reqwest::Client, base: &str, name: &str, project: &str) {
    let resp = client
        .post(format!("{}/api/connections", base))
        .json(&connection_body(name, project))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_healthz() {
    let base = spawn_app().await;
    let resp = reqwest::get(format!("{}/healthz", base)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_connection_crud() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("{}/api/connections", base))
        .json(&connection_body("prod", "Shop"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["name"], "prod");
    assert_eq!(created["token"], "********1234");
    assert_eq!(created["isDefault"], true);

    let duplicate = client
        .post(format!("{}/api/connections", base))
        .json(&connection_body("prod", "Shop"))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    let body: Value = duplicate.json().await.unwrap();
    assert_eq!(body["error"]["code"], "conflict");

    let mut invalid = connection_body("bad", "Shop");
    invalid["orgUrl"] = json!("not a url");
    let resp = client
        .post(format!("{}/api/connections", base))
        .json(&invalid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let updated: Value = client
        .put(format!("{}/api/connections/prod", base))
        .json(&json!({ "project": "Warehouse" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["project"], "Warehouse");

    let list: Value = client
        .get(format!("{}/api/connections", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert!(!list.to_string().contains("secret-token-1234"));

    let resp = client
        .delete(format!("{}/api/connections/prod", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = client
        .get(format!("{}/api/connections/prod", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_connection_test_and_sprints() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();
    create_connection(&client, &base, "prod", "Shop").await;

    let tested: Value = client
        .post(format!("{}/api/connections/prod/test", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tested["ok"], true);
    assert_eq!(tested["project"]["name"], "Shop");

    let sprints: Value = client
        .get(format!("{}/api/connections/prod/sprints", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = sprints
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Sprint 2"]);
}

#[tokio::test]
async fn test_report_kpi_and_export() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();
    create_connection(&client, &base, "prod", "Shop").await;

    let report: Value = client
        .post(format!("{}/api/rtm/report", base))
        .json(&json!({ "ids": [100, 200] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let matrix = report["matrix"].as_array().unwrap();
    assert_eq!(matrix.len(), 3);
    assert_eq!(matrix[0]["UserStoryId"], 100);
    assert_eq!(matrix[0]["TestCaseId"], 501);
    assert_eq!(matrix[0]["Status"], "Covered");
    assert_eq!(matrix[0]["Execution"], "Pass");
    assert_eq!(matrix[1]["TestCaseId"], "");
    assert_eq!(matrix[1]["Execution"], "");
    assert_eq!(matrix[2]["Description"], "Export report");
    assert_eq!(report["statistics"]["overallCoverage"]["coverage"]["coveragePercentage"], 33);
    assert!(report["diagnostics"].as_array().unwrap().is_empty());

    let by_sprint: Value = client
        .post(format!("{}/api/rtm/report", base))
        .json(&json!({ "connection": "prod", "sprint": "Sprint 2" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(by_sprint["matrix"], report["matrix"]);

    let kpi: Value = client
        .post(format!("{}/api/rtm/kpi", base))
        .json(&json!({ "ids": [100, 200] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(kpi["statistics"], report["statistics"]);
    assert!(kpi["kpis"]
        .as_array()
        .unwrap()
        .iter()
        .any(|k| k["label"] == "Coverage %" && k["value"] == "33%"));

    let export = client
        .post(format!("{}/api/rtm/export", base))
        .json(&json!({ "ids": [100, 200] }))
        .send()
        .await
        .unwrap();
    assert_eq!(export.status(), StatusCode::OK);
    assert!(export.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    assert!(export.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .starts_with("attachment"));
    let csv = export.text().await.unwrap();
    assert!(csv.starts_with("UserStoryId,Feature,ScenarioType"));
    assert!(csv.contains("\nKPI,Value\n"));
}

#[tokio::test]
async fn test_report_errors() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let no_default = client
        .post(format!("{}/api/rtm/report", base))
        .json(&json!({ "ids": [100] }))
        .send()
        .await
        .unwrap();
    assert_eq!(no_default.status(), StatusCode::BAD_REQUEST);

    create_connection(&client, &base, "prod", "Shop").await;

    let no_selection = client
        .post(format!("{}/api/rtm/report", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(no_selection.status(), StatusCode::BAD_REQUEST);
    let body: Value = no_selection.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_request");

    let unknown = client
        .post(format!("{}/api/rtm/report", base))
        .json(&json!({ "connection": "nope", "ids": [100] }))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    create_connection(&client, &base, "locked", "Locked").await;
    let rejected = client
        .post(format!("{}/api/rtm/report", base))
        .json(&json!({ "connection": "locked", "ids": [100] }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_GATEWAY);
    let body: Value = rejected.json().await.unwrap();
    assert_eq!(body["error"]["code"], "backend_unauthorized");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_connection_writes() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let mut handles = Vec::new();
    for n in 0..8 {
        let client = client.clone();
        let base = base.clone();
        handles.push(tokio::spawn(async move {
            client
                .post(format!("{}/api/connections", base))
                .json(&connection_body(&format!("conn-{}", n), "Shop"))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::CREATED);
    }

    let list: Value = client
        .get(format!("{}/api/connections", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.as_array().unwrap().len(), 8);
    let defaults = list
        .as_array()
        .unwrap()
        .iter()
        .filter(|c| c["isDefault"] == true)
        .count();
    assert_eq!(defaults, 1);
}
