mod common;

use serde_json::json;
use std::sync::atomic::Ordering;

use common::*;
use nodeflow::domain::engine::engine::Processed;
use nodeflow::domain::model::node::NodeState;
use nodeflow::domain::model::nodetree::NodeTreeState;

#[tokio::test]
async fn launched_add_node_finishes_with_its_sum() {
    let mut h = Harness::new(2);
    let nt = h.submit(&nodetree("single", vec![add_node("a", 2, 3)], vec![]));

    h.send(launch_nodetree(&nt));
    h.settle().await;

    let a = h.node(&nt, "a");
    assert_eq!(a.state, NodeState::Finished);
    assert!(a.hash.is_some());
    assert_eq!(h.output(&nt, "a", "result"), Some(json!(5)));
    assert_eq!(h.store.nodetree(&nt).unwrap().state, NodeTreeState::Finished);
}

#[tokio::test]
async fn cached_result_is_reused_without_invoking_the_executor() {
    let mut h = Harness::new(2);

    let mut first = node("a", "test.counted_add", vec![input("x", json!(2)), input("y", json!(3))], &["result"]);
    first.use_cache = true;
    let nt1 = h.submit(&nodetree("first", vec![first], vec![]));
    h.send(launch_nodetree(&nt1));
    h.settle().await;
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);

    let mut second = node("b", "test.counted_add", vec![input("x", json!(2)), input("y", json!(3))], &["result"]);
    second.use_cache = true;
    let nt2 = h.submit(&nodetree("second", vec![second], vec![]));
    h.send(launch_nodetree(&nt2));
    h.settle().await;

    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.node(&nt2, "b").state, NodeState::Finished);
    assert_eq!(h.output(&nt2, "b", "result"), Some(json!(5)));
    assert_eq!(h.output(&nt2, "b", "result"), h.output(&nt1, "a", "result"));
    assert_eq!(h.node(&nt2, "b").hash, h.node(&nt1, "a").hash);
    assert!(h.log(&nt2, "b").contains("Reused results"));
}

#[tokio::test]
async fn different_parameters_are_not_served_from_cache() {
    let mut h = Harness::new(2);

    for (name, y) in [("a", 3), ("b", 4)] {
        let mut n = node(name, "test.counted_add", vec![input("x", json!(2)), input("y", json!(y))], &["result"]);
        n.use_cache = true;
        let nt = h.submit(&nodetree(name, vec![n], vec![]));
        h.send(launch_nodetree(&nt));
        h.settle().await;
    }

    assert_eq!(h.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn swapped_argument_order_is_not_served_from_cache() {
    let mut h = Harness::new(2);

    let mut forward = node("a", "builtin.identity", vec![input("p", json!(1)), input("q", json!(2))], &["result"]);
    forward.use_cache = true;
    let nt1 = h.submit(&nodetree("forward", vec![forward], vec![]));
    h.send(launch_nodetree(&nt1));
    h.settle().await;
    assert_eq!(h.output(&nt1, "a", "result"), Some(json!(1)));

    let mut swapped = node("b", "builtin.identity", vec![input("p", json!(1)), input("q", json!(2))], &["result"]);
    swapped.args = vec!["q".to_string(), "p".to_string()];
    swapped.use_cache = true;
    let nt2 = h.submit(&nodetree("swapped", vec![swapped], vec![]));
    h.send(launch_nodetree(&nt2));
    h.settle().await;

    assert_eq!(h.node(&nt2, "b").state, NodeState::Finished);
    assert_eq!(h.output(&nt2, "b", "result"), Some(json!(2)));
    assert_ne!(h.node(&nt2, "b").hash, h.node(&nt1, "a").hash);
    assert!(!h.log(&nt2, "b").contains("Reused results"));
}

#[tokio::test]
async fn cache_is_ignored_when_disabled_on_the_node() {
    let mut h = Harness::new(2);

    let mut cached = node("a", "test.counted_add", vec![input("x", json!(2)), input("y", json!(3))], &["result"]);
    cached.use_cache = true;
    let nt1 = h.submit(&nodetree("first", vec![cached], vec![]));
    h.send(launch_nodetree(&nt1));
    h.settle().await;

    let uncached = node("b", "test.counted_add", vec![input("x", json!(2)), input("y", json!(3))], &["result"]);
    let nt2 = h.submit(&nodetree("second", vec![uncached], vec![]));
    h.send(launch_nodetree(&nt2));
    h.settle().await;

    assert_eq!(h.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn repeated_state_message_is_idempotent() {
    let mut h = Harness::new(1);
    let nt = h.submit(&nodetree("idem", vec![add_node("foo", 1, 1)], vec![]));

    let message = node_message(&nt, "foo", "state", "RUNNING");
    h.send(message.clone());
    h.send(message);
    assert_eq!(h.pump(), vec![Processed::Applied, Processed::Applied]);

    let foo = h.node(&nt, "foo");
    assert_eq!(foo.state, NodeState::Running);
    assert_eq!(h.store.nodetree(&nt).unwrap().nodes["foo"].state, NodeState::Running);
}

#[tokio::test]
async fn malformed_message_does_not_stop_the_consumer() {
    let mut h = Harness::new(1);
    let nt = h.submit(&nodetree("robust", vec![add_node("bar", 1, 1)], vec![]));

    h.send(format!("{},node,badformat", nt));
    h.send("nt1-without-separators");
    h.send(node_message(&nt, "bar", "state", "FINISHED"));

    assert_eq!(h.pump(), vec![Processed::Dropped, Processed::Dropped, Processed::Applied]);
    assert_eq!(h.node(&nt, "bar").state, NodeState::Finished);
}

#[tokio::test]
async fn failing_message_marks_the_implicated_node_failed() {
    let mut h = Harness::new(1);
    let nt = h.submit(&nodetree("blame", vec![add_node("foo", 1, 1)], vec![]));

    h.send(node_message(&nt, "foo", "state", "BOGUS"));
    h.send(node_message(&nt, "ghost", "state", "RUNNING"));

    assert_eq!(h.pump(), vec![Processed::Failed, Processed::Dropped]);
    assert_eq!(h.node(&nt, "foo").state, NodeState::Failed);
    assert!(h.log(&nt, "foo").contains("BOGUS"));
}

#[tokio::test]
async fn unknown_action_is_ignored() {
    let mut h = Harness::new(1);
    let nt = h.submit(&nodetree("unknown", vec![add_node("foo", 1, 1)], vec![]));

    h.send(node_message(&nt, "foo", "action", "DANCE"));
    assert_eq!(h.pump(), vec![Processed::Applied]);
    assert_eq!(h.node(&nt, "foo").state, NodeState::Created);
}

#[tokio::test]
async fn executor_error_fails_the_node_and_is_logged() {
    let mut h = Harness::new(1);
    let failing = node("boom", "builtin.fail", vec![input("message", json!("boom"))], &["result"]);
    let nt = h.submit(&nodetree("failing", vec![failing], vec![]));

    h.send(node_message(&nt, "boom", "action", "LAUNCH"));
    h.settle().await;

    assert_eq!(h.node(&nt, "boom").state, NodeState::Failed);
    assert!(h.log(&nt, "boom").contains("boom"));
    assert!(h.output(&nt, "boom", "result").is_none());
}

#[tokio::test]
async fn unknown_executor_fails_before_running() {
    let mut h = Harness::new(1);
    let nt = h.submit(&nodetree("missing", vec![node("n", "no.such.executor", vec![], &["result"])], vec![]));

    h.send(node_message(&nt, "n", "action", "LAUNCH"));
    h.pump();
    h.engine.wait_idle().await;

    let mut emitted = Vec::new();
    while let Some(delivery) = h.queue.try_receive(&h.worker) {
        emitted.push(delivery.message.clone());
        h.engine.process(&delivery.message);
        h.queue.ack(&h.worker, delivery.id);
    }

    assert_eq!(emitted, vec![node_message(&nt, "n", "state", "FAILED")]);
    assert_eq!(h.node(&nt, "n").state, NodeState::Failed);
    assert!(h.log(&nt, "n").contains("no.such.executor"));
}

#[tokio::test]
async fn chain_runs_children_after_parents() {
    let mut h = Harness::new(4);
    let nodes = vec![add_node("a", 2, 3), add_node("b", 0, 10), add_node("c", 0, 100)];
    let links = vec![link("a", "result", "b", "x"), link("b", "result", "c", "x")];
    let nt = h.submit(&nodetree("chain", nodes, links));

    h.send(launch_nodetree(&nt));
    h.settle().await;

    assert_eq!(h.output(&nt, "a", "result"), Some(json!(5)));
    assert_eq!(h.output(&nt, "b", "result"), Some(json!(15)));
    assert_eq!(h.output(&nt, "c", "result"), Some(json!(115)));
    assert_eq!(h.store.nodetree(&nt).unwrap().state, NodeTreeState::Finished);
}

#[tokio::test]
async fn several_links_into_one_socket_are_merged() {
    let mut h = Harness::new(4);
    let nodes = vec![
        add_node("a", 1, 1),
        add_node("b", 2, 2),
        node("total", "math.sum", vec![input("values", json!([]))], &["result"]),
    ];
    let links = vec![link("a", "result", "total", "values"), link("b", "result", "total", "values")];
    let nt = h.submit(&nodetree("fan-in", nodes, links));

    h.send(launch_nodetree(&nt));
    h.settle().await;

    assert_eq!(h.output(&nt, "total", "result"), Some(json!(6)));
}

#[tokio::test]
async fn failure_stops_downstream_nodes() {
    let mut h = Harness::new(2);
    let nodes = vec![node("bad", "builtin.fail", vec![input("message", json!("nope"))], &["result"]), add_node("after", 0, 1)];
    let nt = h.submit(&nodetree("broken", nodes, vec![link("bad", "result", "after", "x")]));

    h.send(launch_nodetree(&nt));
    h.settle().await;

    assert_eq!(h.node(&nt, "bad").state, NodeState::Failed);
    assert_eq!(h.node(&nt, "after").state, NodeState::Created);
    assert_eq!(h.store.nodetree(&nt).unwrap().state, NodeTreeState::Failed);
}

#[tokio::test]
async fn multiple_outputs_take_array_items_in_order() {
    let mut h = Harness::new(1);
    let pair = node("pair", "builtin.identity", vec![input("value", json!([1, "two"]))], &["first", "second"]);
    let nt = h.submit(&nodetree("outputs", vec![pair], vec![]));

    h.send(launch_nodetree(&nt));
    h.settle().await;

    assert_eq!(h.output(&nt, "pair", "first"), Some(json!(1)));
    assert_eq!(h.output(&nt, "pair", "second"), Some(json!("two")));
}

#[tokio::test]
async fn output_count_mismatch_fails_the_node() {
    let mut h = Harness::new(1);
    let pair = node("pair", "builtin.identity", vec![input("value", json!(5))], &["first", "second"]);
    let nt = h.submit(&nodetree("mismatch", vec![pair], vec![]));

    h.send(launch_nodetree(&nt));
    h.settle().await;

    assert_eq!(h.node(&nt, "pair").state, NodeState::Failed);
    assert!(h.output(&nt, "pair", "first").is_none());
}

#[tokio::test]
async fn group_exposes_sub_nodetree_outputs_to_downstream_nodes() {
    let mut h = Harness::new(2);
    let inner = nodetree("inner", vec![add_node("inner_add", 2, 3)], vec![]);
    let group = group_node("g", inner, &[("sum", "inner_add", "result")]);
    let nodes = vec![group, add_node("after", 0, 1)];
    let nt = h.submit(&nodetree("outer", nodes, vec![link("g", "sum", "after", "x")]));

    h.send(launch_nodetree(&nt));
    h.settle().await;

    let g = h.node(&nt, "g");
    assert_eq!(g.state, NodeState::Finished);
    assert_eq!(h.output(&nt, "g", "sum"), Some(json!(5)));
    assert_eq!(h.output(&nt, "after", "result"), Some(json!(6)));

    let sub = g.metadata.sub_nodetree.unwrap();
    assert_eq!(h.store.nodetree(&sub).unwrap().state, NodeTreeState::Finished);
    assert_eq!(h.store.nodetree(&nt).unwrap().state, NodeTreeState::Finished);
}

#[tokio::test]
async fn failed_sub_nodetree_fails_its_group() {
    let mut h = Harness::new(2);
    let inner = nodetree("inner", vec![node("bad", "builtin.fail", vec![input("message", json!("inner boom"))], &["result"])], vec![]);
    let group = group_node("g", inner, &[("out", "bad", "result")]);
    let nt = h.submit(&nodetree("outer", vec![group], vec![]));

    h.send(launch_nodetree(&nt));
    h.settle().await;

    assert_eq!(h.node(&nt, "g").state, NodeState::Failed);
    assert_eq!(h.store.nodetree(&nt).unwrap().state, NodeTreeState::Failed);
}

#[tokio::test]
async fn skip_marks_node_and_descendants() {
    let mut h = Harness::new(2);
    let nodes = vec![add_node("a", 1, 1), add_node("b", 0, 1), add_node("free", 3, 3)];
    let nt = h.submit(&nodetree("skip", nodes, vec![link("a", "result", "b", "x")]));

    h.send(node_message(&nt, "a", "action", "SKIP"));
    h.send(launch_nodetree(&nt));
    h.settle().await;

    assert_eq!(h.node(&nt, "a").state, NodeState::Skipped);
    assert_eq!(h.node(&nt, "b").state, NodeState::Skipped);
    assert_eq!(h.node(&nt, "free").state, NodeState::Finished);
    assert_eq!(h.store.nodetree(&nt).unwrap().state, NodeTreeState::Finished);
}

#[tokio::test]
async fn reset_allows_a_failed_node_to_run_again() {
    let mut h = Harness::new(2);
    let nodes = vec![add_node("a", 1, 2), add_node("b", 0, 1)];
    let nt = h.submit(&nodetree("rerun", nodes, vec![link("a", "result", "b", "x")]));

    h.send(launch_nodetree(&nt));
    h.settle().await;
    assert_eq!(h.output(&nt, "b", "result"), Some(json!(4)));

    h.send(node_message(&nt, "a", "action", "RESET"));
    h.pump();
    assert_eq!(h.node(&nt, "a").state, NodeState::Created);
    assert_eq!(h.node(&nt, "b").state, NodeState::Created);
    assert!(h.output(&nt, "b", "result").is_none());

    h.send(launch_nodetree(&nt));
    h.settle().await;
    assert_eq!(h.output(&nt, "b", "result"), Some(json!(4)));
}

#[tokio::test]
async fn worker_messages_stop_and_refresh_heartbeat() {
    let mut h = Harness::new(1);

    h.send(format!("{},worker,action:UPDATE", WORKER));
    h.send(format!("{},worker,action:STOP", WORKER));
    assert_eq!(h.pump(), vec![Processed::Applied, Processed::Stop]);
    assert!(h.store.worker(&h.worker).is_some());
}
