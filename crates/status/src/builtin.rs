//! Built-in readiness for common workload and networking kinds.

use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::networking::v1 as netv1;
use k8s_openapi::api::policy::v1 as policyv1;
use keel_core::{Gvk, RawObject};
use serde::de::DeserializeOwned;

use crate::ReadyState;

/// Readiness for kinds with built-in support. `None` means the kind falls
/// outside the table entirely; callers default it to Unknown.
///
/// Matching ignores the version: the status fields consulted are stable
/// across served versions of these kinds.
pub(crate) fn builtin_status(gvk: &Gvk, obj: &RawObject) -> Option<ReadyState> {
    let state = match (gvk.group.as_str(), gvk.kind.as_str()) {
        ("apps", "StatefulSet") => eval(obj, statefulset_status),
        ("apps", "Deployment") => eval(obj, deployment_status),
        ("apps", "ReplicaSet") => eval(obj, replicaset_status),
        ("apps", "DaemonSet") => eval(obj, daemonset_status),
        ("", "PersistentVolumeClaim") => eval(obj, pvc_status),
        ("", "Service") => eval(obj, service_status),
        ("networking.k8s.io", "Ingress") | ("extensions", "Ingress") => eval(obj, ingress_status),
        ("", "Pod") => eval(obj, pod_status),
        ("policy", "PodDisruptionBudget") => eval(obj, pdb_status),
        // Remaining kinds in the common families carry no readiness signal
        // of their own (ConfigMap, Secret, ...): optimistic Ready.
        (group, _) if is_common_family(group) => ReadyState::Ready,
        _ => return None,
    };
    Some(state)
}

fn is_common_family(group: &str) -> bool {
    matches!(group, "" | "apps" | "extensions" | "networking.k8s.io" | "policy")
}

/// Deserialize the child into its typed form, dropping the identity fields
/// so any served version parses. A mis-shaped object reports Unknown.
fn eval<T: DeserializeOwned>(obj: &RawObject, f: fn(T) -> ReadyState) -> ReadyState {
    let mut value = obj.as_value().clone();
    if let Some(map) = value.as_object_mut() {
        map.remove("apiVersion");
        map.remove("kind");
    }
    match serde_json::from_value::<T>(value) {
        Ok(typed) => f(typed),
        Err(_) => ReadyState::Unknown,
    }
}

fn statefulset_status(sts: appsv1::StatefulSet) -> ReadyState {
    let desired = sts.spec.and_then(|s| s.replicas).unwrap_or(1);
    let status = sts.status.unwrap_or_default();
    if status.ready_replicas.unwrap_or(0) == desired && status.current_replicas.unwrap_or(0) == desired
    {
        ReadyState::Ready
    } else {
        ReadyState::Progressing
    }
}

fn deployment_status(dep: appsv1::Deployment) -> ReadyState {
    let mut progress = true;
    let mut available = true;
    for c in dep.status.unwrap_or_default().conditions.unwrap_or_default() {
        match c.type_.as_str() {
            // "NewReplicaSetAvailable" is the terminal reason of a finished
            // rollout; anything else still counts as in-progress.
            "Progressing" => {
                if c.status != "True" || c.reason.as_deref() != Some("NewReplicaSetAvailable") {
                    progress = false;
                }
            }
            "Available" => {
                if c.status == "False" {
                    available = false;
                }
            }
            _ => {}
        }
    }
    if progress && available {
        ReadyState::Ready
    } else {
        ReadyState::Progressing
    }
}

fn replicaset_status(rs: appsv1::ReplicaSet) -> ReadyState {
    let status = rs.status.unwrap_or_default();
    let failure = status
        .conditions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|c| c.type_ == "ReplicaFailure" && c.status == "True");
    if !failure
        && status.ready_replicas.unwrap_or(0) == status.replicas
        && status.replicas == status.available_replicas.unwrap_or(0)
    {
        ReadyState::Ready
    } else {
        ReadyState::Progressing
    }
}

fn daemonset_status(ds: appsv1::DaemonSet) -> ReadyState {
    let status = ds.status.unwrap_or_default();
    if status.desired_number_scheduled == status.number_available.unwrap_or(0)
        && status.desired_number_scheduled == status.number_ready
    {
        ReadyState::Ready
    } else {
        ReadyState::Progressing
    }
}

fn pvc_status(pvc: corev1::PersistentVolumeClaim) -> ReadyState {
    match pvc.status.and_then(|s| s.phase).as_deref() {
        Some("Bound") => ReadyState::Ready,
        _ => ReadyState::Progressing,
    }
}

fn service_status(svc: corev1::Service) -> ReadyState {
    let spec = svc.spec.unwrap_or_default();
    if spec.type_.as_deref() == Some("LoadBalancer") {
        // LoadBalancer services wait for an external address to bind.
        let bound = svc
            .status
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .map(|i| !i.is_empty())
            .unwrap_or(false);
        if !bound {
            return ReadyState::Progressing;
        }
    }
    ReadyState::Ready
}

fn ingress_status(ing: netv1::Ingress) -> ReadyState {
    let bound = ing
        .status
        .and_then(|s| s.load_balancer)
        .and_then(|lb| lb.ingress)
        .map(|i| !i.is_empty())
        .unwrap_or(false);
    if bound {
        ReadyState::Ready
    } else {
        ReadyState::Progressing
    }
}

fn pod_status(pod: corev1::Pod) -> ReadyState {
    let ready = pod
        .status
        .unwrap_or_default()
        .conditions
        .unwrap_or_default()
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True");
    if ready {
        ReadyState::Ready
    } else {
        ReadyState::Progressing
    }
}

fn pdb_status(pdb: policyv1::PodDisruptionBudget) -> ReadyState {
    let status = pdb.status.unwrap_or_default();
    if status.current_healthy >= status.desired_healthy {
        ReadyState::Ready
    } else {
        ReadyState::Progressing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: serde_json::Value) -> RawObject {
        RawObject::from_value(v)
    }

    #[test]
    fn statefulset_ready_when_replica_counts_match() {
        let sts = raw(json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": { "name": "db", "namespace": "ns" },
            "spec": { "replicas": 3 },
            "status": { "replicas": 3, "readyReplicas": 3, "currentReplicas": 3 },
        }));
        let gvk = sts.gvk().unwrap();
        assert_eq!(builtin_status(&gvk, &sts), Some(ReadyState::Ready));
    }

    #[test]
    fn statefulset_progressing_when_short_on_ready_replicas() {
        let sts = raw(json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": { "name": "db", "namespace": "ns" },
            "spec": { "replicas": 3 },
            "status": { "replicas": 3, "readyReplicas": 2, "currentReplicas": 3 },
        }));
        let gvk = sts.gvk().unwrap();
        assert_eq!(builtin_status(&gvk, &sts), Some(ReadyState::Progressing));
    }

    #[test]
    fn deployment_requires_terminal_progress_reason() {
        let ready = raw(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web" },
            "status": { "conditions": [
                { "type": "Progressing", "status": "True", "reason": "NewReplicaSetAvailable" },
                { "type": "Available", "status": "True" },
            ]},
        }));
        let gvk = ready.gvk().unwrap();
        assert_eq!(builtin_status(&gvk, &ready), Some(ReadyState::Ready));

        let rolling = raw(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web" },
            "status": { "conditions": [
                { "type": "Progressing", "status": "True", "reason": "ReplicaSetUpdated" },
            ]},
        }));
        assert_eq!(builtin_status(&gvk, &rolling), Some(ReadyState::Progressing));
    }

    #[test]
    fn service_waits_for_load_balancer_bind() {
        let pending = raw(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "svc" },
            "spec": { "type": "LoadBalancer" },
            "status": { "loadBalancer": {} },
        }));
        let gvk = pending.gvk().unwrap();
        assert_eq!(builtin_status(&gvk, &pending), Some(ReadyState::Progressing));

        let bound = raw(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "svc" },
            "spec": { "type": "LoadBalancer" },
            "status": { "loadBalancer": { "ingress": [ { "ip": "10.0.0.1" } ] } },
        }));
        assert_eq!(builtin_status(&gvk, &bound), Some(ReadyState::Ready));

        let cluster_ip = raw(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "svc" },
            "spec": { "type": "ClusterIP" },
        }));
        assert_eq!(builtin_status(&gvk, &cluster_ip), Some(ReadyState::Ready));
    }

    #[test]
    fn pod_ready_condition_drives_state() {
        let pod = raw(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "p" },
            "status": { "conditions": [ { "type": "Ready", "status": "True" } ] },
        }));
        let gvk = pod.gvk().unwrap();
        assert_eq!(builtin_status(&gvk, &pod), Some(ReadyState::Ready));
    }

    #[test]
    fn pdb_compares_healthy_counts() {
        let pdb = raw(json!({
            "apiVersion": "policy/v1",
            "kind": "PodDisruptionBudget",
            "metadata": { "name": "pdb" },
            "status": { "currentHealthy": 2, "desiredHealthy": 2, "disruptionsAllowed": 0, "expectedPods": 2 },
        }));
        let gvk = pdb.gvk().unwrap();
        assert_eq!(builtin_status(&gvk, &pdb), Some(ReadyState::Ready));
    }

    #[test]
    fn common_family_without_signal_is_optimistically_ready() {
        let cm = raw(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cfg" },
            "data": {},
        }));
        let gvk = cm.gvk().unwrap();
        assert_eq!(builtin_status(&gvk, &cm), Some(ReadyState::Ready));
    }

    #[test]
    fn custom_group_is_outside_the_table() {
        let cron = raw(json!({
            "apiVersion": "batch/v1",
            "kind": "CronJob",
            "metadata": { "name": "tick" },
        }));
        let gvk = cron.gvk().unwrap();
        assert_eq!(builtin_status(&gvk, &cron), None);
    }
}
