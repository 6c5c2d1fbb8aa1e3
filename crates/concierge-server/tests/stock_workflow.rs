// End-to-end scenarios against the bundled stock-trading fixture, exercised
// through the transport-agnostic Engine (constructing a real
// RequestContext<RoleServer> requires an actual rmcp transport connection,
// which is out of scope for a crate-level test; the adapter's own
// session-id-resolution logic is covered in src/adapter.rs's unit tests).

use std::sync::Arc;

use concierge_core::{ConciergeError, Engine, InMemoryState, ToolOutcome};
use concierge_server::fixtures::stock_workflow;
use serde_json::json;

fn engine() -> Engine {
    Engine::new(stock_workflow(), Arc::new(InMemoryState::new()))
}

#[tokio::test]
async fn new_session_sees_only_browse_stage_tools() {
    let engine = engine();
    let tools = engine.list_tools(Some("sess-1")).await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();

    assert!(names.contains(&"search"));
    assert!(names.contains(&"add_to_cart"));
    assert!(names.contains(&"view_history"));
    assert!(names.contains(&"proceed_to_next_stage"));
    assert!(names.contains(&"terminate_session"));
    assert!(!names.contains(&"buy"));
}

#[tokio::test]
async fn transacting_without_a_cart_is_blocked_and_stage_is_unchanged() {
    let engine = engine();
    let outcome = engine
        .call_tool("sess-1", "proceed_to_next_stage", json!({"target_stage": "transact"}))
        .await
        .unwrap();

    assert!(matches!(outcome, ToolOutcome::MissingPrerequisites { ref stage, .. } if stage == "transact"));
    assert_eq!(engine.snapshot("sess-1").await.unwrap().current_stage, "browse");
}

#[tokio::test]
async fn adding_to_cart_then_transacting_unlocks_buy_and_sell() {
    let engine = engine();
    engine
        .call_tool("sess-1", "add_to_cart", json!({"symbol": "AAPL", "quantity": 10}))
        .await
        .unwrap();

    let outcome = engine
        .call_tool("sess-1", "proceed_to_next_stage", json!({"target_stage": "transact"}))
        .await
        .unwrap();
    assert!(matches!(outcome, ToolOutcome::Transitioned { ref to, .. } if to == "transact"));

    let buy_result = engine.call_tool("sess-1", "buy", json!({})).await.unwrap();
    match buy_result {
        ToolOutcome::ToolResult(value) => {
            assert_eq!(value["order_id"], json!("ORD123"));
        }
        other => panic!("expected ToolResult, got {other:?}"),
    }
}

#[tokio::test]
async fn browse_to_portfolio_transfers_all_state_without_a_cart_gate() {
    let engine = engine();
    engine
        .call_tool("sess-1", "add_to_cart", json!({"symbol": "GOOGL", "quantity": 3}))
        .await
        .unwrap();

    let outcome = engine
        .call_tool("sess-1", "proceed_to_next_stage", json!({"target_stage": "portfolio"}))
        .await
        .unwrap();
    assert!(matches!(outcome, ToolOutcome::Transitioned { ref to, .. } if to == "portfolio"));

    let tools = engine.list_tools(Some("sess-1")).await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"view_holdings"));
    assert!(names.contains(&"view_profit"));
}

#[tokio::test]
async fn transitioning_to_a_disallowed_stage_is_a_structured_result_not_an_error() {
    let engine = engine();
    let outcome = engine
        .call_tool("sess-1", "proceed_to_next_stage", json!({"target_stage": "nonexistent"}))
        .await
        .unwrap();

    match outcome {
        ToolOutcome::InvalidTransition { from, to, allowed } => {
            assert_eq!(from, "browse");
            assert_eq!(to, "nonexistent");
            assert!(allowed.contains(&"transact".to_string()));
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
    assert_eq!(engine.snapshot("sess-1").await.unwrap().current_stage, "browse");
}

#[tokio::test]
async fn calling_a_tool_outside_the_current_stage_is_rejected() {
    let engine = engine();
    let err = engine.call_tool("sess-1", "buy", json!({})).await.unwrap_err();
    assert!(matches!(err, ConciergeError::ToolNotFound(_)));
}

#[tokio::test]
async fn terminating_resets_state_and_stage() {
    let engine = engine();
    engine
        .call_tool("sess-1", "add_to_cart", json!({"symbol": "AAPL", "quantity": 10}))
        .await
        .unwrap();
    engine
        .call_tool("sess-1", "proceed_to_next_stage", json!({"target_stage": "transact"}))
        .await
        .unwrap();

    let outcome = engine.call_tool("sess-1", "terminate_session", json!({})).await.unwrap();
    assert!(matches!(outcome, ToolOutcome::Terminated { ref previous_stage } if previous_stage == "transact"));

    let snapshot = engine.snapshot("sess-1").await.unwrap();
    assert_eq!(snapshot.current_stage, "browse");
    assert_eq!(snapshot.state_key_count, 0);
}

#[tokio::test]
async fn two_sessions_never_observe_each_others_stage_or_state() {
    let engine = engine();
    engine
        .call_tool("alice", "add_to_cart", json!({"symbol": "AAPL", "quantity": 10}))
        .await
        .unwrap();
    engine
        .call_tool("alice", "proceed_to_next_stage", json!({"target_stage": "transact"}))
        .await
        .unwrap();

    assert_eq!(engine.snapshot("alice").await.unwrap().current_stage, "transact");
    assert_eq!(engine.snapshot("bob").await.unwrap().current_stage, "browse");

    let bob_tools = engine.list_tools(Some("bob")).await.unwrap();
    assert!(bob_tools.iter().any(|t| t.name == "search"));
}
