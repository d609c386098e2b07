//! End-to-end phased loading sessions over mock HTTP sources

mod common;

use civicpulse::core::model::{PhaseStatus, RunStatus, SessionStatus, Strategy};
use civicpulse::core::phases::{PhasedLoader, SessionReport};
use common::{harness, Harness, ScraperDir};
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_members(server: &MockServer, route: &str, ids: &[&str], delay: Duration) {
    let members: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| {
            serde_json::json!({
                "external_id": id,
                "name": format!("Member {id}"),
                "role": "member"
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!(members))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

fn scraper(
    id: &'static str,
    category: &'static str,
    kind: &'static str,
    code: &'static str,
    uri: &str,
    route: &str,
) -> ScraperDir<'static> {
    ScraperDir {
        id,
        category,
        kind,
        code,
        name: code,
        endpoints: Some(format!(
            r#"{{"endpoints": [{{"url": "{uri}{route}", "kind": "person"}}]}}"#
        )),
    }
}

async fn wait_for(loader: &PhasedLoader, wanted: SessionStatus) -> SessionReport {
    for _ in 0..400 {
        if let Some(report) = loader.status().await {
            if report.status == wanted {
                return report;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("session never reached {wanted:?}");
}

async fn fleet(server: &MockServer, federal_delay: Duration) -> Harness {
    mock_members(server, "/federal", &["mp-1", "mp-2"], federal_delay).await;
    mock_members(server, "/ontario", &["mpp-1"], Duration::ZERO).await;
    mock_members(server, "/manitoba", &["mla-1"], Duration::ZERO).await;
    mock_members(server, "/toronto", &["cllr-1"], Duration::ZERO).await;

    let uri = server.uri();
    harness(
        &[
            scraper("openparliament", "parliamentary", "federal", "ca", &uri, "/federal"),
            scraper("ca_on", "provincial", "provincial", "ca-on", &uri, "/ontario"),
            scraper("ca_mb", "provincial", "provincial", "ca-mb", &uri, "/manitoba"),
            scraper("ca_on_toronto", "municipal", "municipal", "ca-on-toronto", &uri, "/toronto"),
        ],
        HashMap::new(),
    )
    .await
}

#[tokio::test]
async fn balanced_session_loads_the_whole_fleet() {
    let server = MockServer::start().await;
    let h = fleet(&server, Duration::ZERO).await;
    let loader = PhasedLoader::new(h.ctx.clone(), h.pool.clone());

    let session_id = loader.start(Strategy::Balanced, "e2e").await.unwrap();
    let report = wait_for(&loader, SessionStatus::Completed).await;

    assert_eq!(report.session_id, session_id);
    for phase in &report.phases {
        assert!(matches!(
            phase.status,
            PhaseStatus::Completed | PhaseStatus::Skipped
        ));
    }

    // four scrapers, four successful runs, five representatives
    assert_eq!(
        h.ctx
            .store
            .count_runs_in_status(RunStatus::Success)
            .await
            .unwrap(),
        4
    );
    let mut total_reps = 0;
    for jurisdiction in h.ctx.store.list_jurisdictions().await.unwrap() {
        total_reps += h
            .ctx
            .store
            .list_representatives(jurisdiction.id)
            .await
            .unwrap()
            .len();
    }
    assert_eq!(total_reps, 5);

    // the durable phase rows agree with the report
    let phases = h.ctx.store.phases_for_session(&session_id).await.unwrap();
    assert_eq!(phases.len(), 7);
    assert!(phases.iter().all(|p| matches!(
        p.status,
        PhaseStatus::Completed | PhaseStatus::Skipped
    )));
}

#[tokio::test]
async fn pause_between_phases_then_resume_completes() {
    let server = MockServer::start().await;
    // the federal fetch takes a moment, leaving time to pause mid-phase
    let h = fleet(&server, Duration::from_millis(600)).await;
    let loader = PhasedLoader::new(h.ctx.clone(), h.pool.clone());

    loader.start(Strategy::Balanced, "e2e").await.unwrap();

    // wait for the federal run to be in flight, then pause
    for _ in 0..100 {
        if h.ctx
            .store
            .count_runs_in_status(RunStatus::Running)
            .await
            .unwrap()
            > 0
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    loader.pause("operator").await.unwrap();

    // the in-flight federal run completes during the pause
    wait_for(&loader, SessionStatus::Paused).await;
    tokio::time::sleep(Duration::from_millis(800)).await;

    // nothing provincial started while paused
    let runs = h.ctx.store.recent_runs(20).await.unwrap();
    assert!(runs.iter().all(|r| r.scraper_id == "openparliament"));

    loader.resume().await.unwrap();
    let report = wait_for(&loader, SessionStatus::Completed).await;

    for phase in &report.phases {
        assert!(matches!(
            phase.status,
            PhaseStatus::Completed | PhaseStatus::Skipped
        ));
    }
    assert_eq!(
        h.ctx
            .store
            .count_runs_in_status(RunStatus::Success)
            .await
            .unwrap(),
        4
    );
}

#[tokio::test]
async fn cancelled_session_keeps_partial_data_and_allows_restart() {
    let server = MockServer::start().await;
    // a slow provincial source keeps the phase in flight
    mock_members(&server, "/federal", &["mp-1"], Duration::ZERO).await;
    mock_members(&server, "/ontario", &["mpp-1"], Duration::from_secs(3)).await;

    let uri = server.uri();
    let h = harness(
        &[
            scraper("openparliament", "parliamentary", "federal", "ca", &uri, "/federal"),
            scraper("ca_on", "provincial", "provincial", "ca-on", &uri, "/ontario"),
        ],
        HashMap::new(),
    )
    .await;
    let loader = PhasedLoader::new(h.ctx.clone(), h.pool.clone());

    let first_id = loader.start(Strategy::Balanced, "e2e").await.unwrap();

    // wait until the slow provincial run is in flight
    for _ in 0..200 {
        let runs = h.ctx.store.recent_runs(10).await.unwrap();
        if runs
            .iter()
            .any(|r| r.scraper_id == "ca_on" && r.status == RunStatus::Running)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    loader.cancel().await.unwrap();
    wait_for(&loader, SessionStatus::Cancelled).await;

    // federal data committed before the cancel remains
    let federal = h
        .ctx
        .store
        .find_jurisdiction_by_code("ca")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        h.ctx
            .store
            .list_representatives(federal.id)
            .await
            .unwrap()
            .len(),
        1
    );

    // the interrupted run reached a terminal status
    let runs = h.ctx.store.recent_runs(10).await.unwrap();
    let ca_on_run = runs.iter().find(|r| r.scraper_id == "ca_on").unwrap();
    assert!(ca_on_run.status.is_terminal());

    // a fresh session is permitted and distinct
    let second_id = loader.start(Strategy::Balanced, "e2e").await.unwrap();
    assert_ne!(first_id, second_id);
    loader.cancel().await.unwrap();
    wait_for(&loader, SessionStatus::Cancelled).await;
}
