#![forbid(unsafe_code)]

use std::sync::Arc;

use keel_core::{Gvk, RawObject};
use keel_status::{Aggregator, CompositeStatus, ConditionType, Phase, ReadyState, StatusFns};
use serde_json::json;

fn aggregator() -> Aggregator {
    Aggregator::new(Arc::new(StatusFns::new()))
}

fn statefulset(name: &str, desired: i64, ready: i64, current: i64) -> RawObject {
    RawObject::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": { "name": name, "namespace": "prod" },
        "spec": { "replicas": desired },
        "status": { "replicas": desired, "readyReplicas": ready, "currentReplicas": current },
    }))
}

fn configmap(name: &str) -> RawObject {
    RawObject::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name, "namespace": "prod" },
    }))
}

fn custom(name: &str) -> RawObject {
    RawObject::from_value(json!({
        "apiVersion": "widgets.example.com/v1",
        "kind": "Widget",
        "metadata": { "name": name, "namespace": "prod" },
    }))
}

#[test]
fn all_ready_children_aggregate_to_ready() {
    let agg = aggregator();
    let mut status = CompositeStatus::default();
    let children = vec![statefulset("db", 3, 3, 3), configmap("cfg")];

    agg.aggregate(&mut status, &children, None);

    assert_eq!(status.phase, Phase::Ready);
    assert_eq!(status.modules.len(), 2);
    assert_eq!(status.modules[0].namespaced_name, "prod/db");
    assert_eq!(status.modules[0].kind, "StatefulSet");
    assert_eq!(status.modules[0].group_version, "apps/v1");
    assert!(status.is_ready());
    assert_eq!(status.condition_reason(ConditionType::Ready), "ComponentsReady");
}

#[test]
fn one_lagging_child_turns_phase_progressing() {
    let agg = aggregator();
    let mut status = CompositeStatus::default();
    let children = vec![statefulset("db", 3, 2, 3), configmap("cfg")];

    agg.aggregate(&mut status, &children, None);

    assert_eq!(status.phase, Phase::Progressing);
    assert_eq!(status.modules[0].status, ReadyState::Progressing);
    assert!(status.is_not_ready());
    assert_eq!(status.condition_reason(ConditionType::Ready), "ComponentsNotReady");
}

#[test]
fn unregistered_custom_kind_is_unknown_and_blocks_readiness() {
    let agg = aggregator();
    let mut status = CompositeStatus::default();
    let children = vec![statefulset("db", 1, 1, 1), custom("w1")];

    agg.aggregate(&mut status, &children, None);

    assert_eq!(status.modules[1].status, ReadyState::Unknown);
    assert_eq!(status.phase, Phase::Progressing);
}

#[test]
fn registered_status_fn_overrides_the_default() {
    let fns = Arc::new(StatusFns::new());
    fns.register(
        &Gvk::new("widgets.example.com", "v1", "Widget"),
        Arc::new(|obj: &RawObject| {
            if obj.as_value().pointer("/status/online") == Some(&json!(true)) {
                ReadyState::Ready
            } else {
                ReadyState::Progressing
            }
        }),
    );
    let agg = Aggregator::new(fns);

    let online = {
        let mut v = custom("w1").into_value();
        v["status"] = json!({ "online": true });
        RawObject::from_value(v)
    };

    let mut status = CompositeStatus::default();
    agg.aggregate(&mut status, &[online, custom("w2")], None);

    assert_eq!(status.modules[0].status, ReadyState::Ready);
    assert_eq!(status.modules[1].status, ReadyState::Progressing);
    assert_eq!(status.phase, Phase::Progressing);
}

#[test]
fn modules_are_rebuilt_wholesale_each_pass() {
    let agg = aggregator();
    let mut status = CompositeStatus::default();
    agg.aggregate(&mut status, &[configmap("a"), configmap("b")], None);
    assert_eq!(status.modules.len(), 2);

    agg.aggregate(&mut status, &[configmap("c")], None);
    assert_eq!(status.modules.len(), 1);
    assert_eq!(status.modules[0].namespaced_name, "prod/c");
}

#[test]
fn prior_error_forces_the_error_condition() {
    let agg = aggregator();
    let mut status = CompositeStatus::default();
    let err = anyhow::anyhow!("pipeline unit 'binder' failed: boom");

    agg.aggregate(&mut status, &[configmap("a")], Some(&err));

    // The phase computation is untouched by the error...
    assert_eq!(status.phase, Phase::Ready);
    // ...but the Error condition carries the message.
    let c = status.get_condition(ConditionType::Error).unwrap();
    assert_eq!(c.message, "pipeline unit 'binder' failed: boom");
    assert!(status.is_condition_true(ConditionType::Error));

    // Recovery does not clear the error; that is the caller's call.
    agg.aggregate(&mut status, &[configmap("a")], None);
    assert!(status.is_condition_true(ConditionType::Error));
}
