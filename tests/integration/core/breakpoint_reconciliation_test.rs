//! setBreakpoints against a live session: full replace, per-line
//! verification and breakpoints set before the engine is attached.

use assert_matches::assert_matches;
use cell_debugger::Error;
use serde_json::json;

#[path = "../../helpers/mod.rs"]
mod helpers;
use helpers::TestSession;

const CELL: &str = "int x;\nx = 5;\nint y = x * 2;\nreturn y;";

#[tokio::test]
async fn test_second_call_replaces_first() {
    let mut session = TestSession::start();
    session.attach().await;
    let path = session.dump(CELL).await;
    let unit = TestSession::unit(1);

    let first = session.set_breakpoints(&path, &[2, 3]).await;
    assert_eq!(first.len(), 2);
    assert_eq!(session.engine.bound_lines(&unit), vec![2, 3]);

    let second = session.set_breakpoints(&path, &[4]).await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0]["line"], 4);
    assert_eq!(session.engine.bound_lines(&unit), vec![4]);

    let info = session.ok("debugInfo", json!({})).await;
    assert_eq!(info["breakpoints"][0]["breakpoints"], json!([{"line": 4}]));
}

#[tokio::test]
async fn test_declaration_line_is_unverified() {
    let mut session = TestSession::start();
    session.attach().await;
    let path = session.dump(CELL).await;

    let bps = session.set_breakpoints(&path, &[1, 2]).await;

    assert_eq!(bps[0]["verified"], false);
    assert_eq!(bps[0]["line"], 1);
    assert!(bps[0]["message"].is_string());
    assert!(bps[0].get("id").is_none());

    assert_eq!(bps[1]["verified"], true);
    assert_eq!(bps[1]["line"], 2);
    assert!(bps[1]["id"].is_i64());
    assert_eq!(bps[1]["source"]["path"], path.as_str());
}

#[tokio::test]
async fn test_results_follow_request_order() {
    let mut session = TestSession::start();
    session.attach().await;
    let path = session.dump(CELL).await;

    let bps = session.set_breakpoints(&path, &[4, 1, 3]).await;
    let lines: Vec<i64> = bps.iter().map(|bp| bp["line"].as_i64().unwrap()).collect();
    let verified: Vec<bool> = bps.iter().map(|bp| bp["verified"].as_bool().unwrap()).collect();

    assert_eq!(lines, vec![4, 1, 3]);
    assert_eq!(verified, vec![true, false, true]);
}

#[tokio::test]
async fn test_empty_list_clears_the_cell() {
    let mut session = TestSession::start();
    session.attach().await;
    let path = session.dump(CELL).await;
    let unit = TestSession::unit(1);

    session.set_breakpoints(&path, &[2]).await;
    let cleared = session.set_breakpoints(&path, &[]).await;

    assert!(cleared.is_empty());
    assert!(session.engine.bound_lines(&unit).is_empty());
    assert!(session.engine.calls().contains(&format!("clear {}", unit)));
}

#[tokio::test]
async fn test_empty_list_without_breakpoints_skips_engine() {
    let mut session = TestSession::start();
    session.attach().await;
    let path = session.dump(CELL).await;

    session.set_breakpoints(&path, &[]).await;
    assert!(!session
        .engine
        .calls()
        .iter()
        .any(|call| call.starts_with("clear") || call.starts_with("set")));
}

#[tokio::test]
async fn test_cells_are_reconciled_independently() {
    let mut session = TestSession::start();
    session.attach().await;
    let first = session.dump(CELL).await;
    let second = session.dump("int z = 1;\nreturn z;").await;

    session.set_breakpoints(&first, &[2]).await;
    session.set_breakpoints(&second, &[1, 2]).await;
    session.set_breakpoints(&second, &[2]).await;

    assert_eq!(session.engine.bound_lines(&TestSession::unit(1)), vec![2]);
    assert_eq!(session.engine.bound_lines(&TestSession::unit(2)), vec![2]);
}

#[tokio::test]
async fn test_breakpoints_before_attach_resolve_on_attach() {
    let mut session = TestSession::start();
    session.initialize().await;
    let path = session.dump(CELL).await;

    let pending = session.set_breakpoints(&path, &[1, 3]).await;
    assert!(pending.iter().all(|bp| bp["verified"] == false));
    assert!(pending[0]["message"].as_str().unwrap().contains("after attach"));
    assert!(session.engine.calls().is_empty());

    session.attach().await;

    assert_eq!(session.engine.bound_lines(&TestSession::unit(1)), vec![3]);
    let info = session.ok("debugInfo", json!({})).await;
    assert_eq!(
        info["breakpoints"][0]["breakpoints"],
        json!([{"line": 1}, {"line": 3}])
    );
}

#[tokio::test]
async fn test_zero_based_client_lines() {
    let mut session = TestSession::start();
    session
        .ok("initialize", json!({"adapterID": "xcpp17", "linesStartAt1": false}))
        .await;
    session.ok("attach", json!({})).await;
    session.expect_event("initialized").await;
    let path = session.dump(CELL).await;

    let bps = session.set_breakpoints(&path, &[1]).await;

    assert_eq!(bps[0]["line"], 1);
    assert_eq!(bps[0]["verified"], true);
    assert_eq!(session.engine.bound_lines(&TestSession::unit(1)), vec![2]);
}

#[tokio::test]
async fn test_out_of_range_client_line_is_unverified() {
    let mut session = TestSession::start();
    session
        .ok("initialize", json!({"adapterID": "xcpp17", "linesStartAt1": false}))
        .await;
    session.ok("attach", json!({})).await;
    session.expect_event("initialized").await;
    let path = session.dump(CELL).await;

    let bps = session.set_breakpoints(&path, &[i64::MAX]).await;

    assert_eq!(bps[0]["verified"], false);
    let info = session.ok("debugInfo", json!({})).await;
    assert_eq!(info["isStarted"], true);
}

#[tokio::test]
async fn test_unknown_source_is_rejected() {
    let mut session = TestSession::start();
    session.attach().await;

    let result = session
        .request(
            "setBreakpoints",
            json!({"source": {"path": "/tmp/never_dumped.cpp"}, "breakpoints": [{"line": 1}]}),
        )
        .await;
    assert_matches!(result, Err(Error::UnknownSource(path)) if path.contains("never_dumped"));
}

#[tokio::test]
async fn test_source_without_path_is_a_protocol_error() {
    let mut session = TestSession::start();
    session.attach().await;

    let result = session
        .request(
            "setBreakpoints",
            json!({"source": {"name": "cell"}, "breakpoints": [{"line": 1}]}),
        )
        .await;
    assert_matches!(result, Err(Error::Protocol(_)));
}
