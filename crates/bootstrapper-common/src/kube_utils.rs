//! Kubernetes helpers: apiVersion parsing, API error classification and
//! desired-vs-live comparison.

use std::time::Duration;

use serde_json::Value;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Status reason the API server uses when a create hits an existing object
pub const REASON_ALREADY_EXISTS: &str = "AlreadyExists";

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use bootstrapper_common::kube_utils::parse_api_version;
///
/// assert_eq!(parse_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Whether a create failed because the object already exists
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == REASON_ALREADY_EXISTS)
}

/// Classify a kube-rs error as retryable (`true`) or fatal (`false`).
///
/// Retryable: the server is unreachable or not ready, the resource type is not
/// served yet, or a concurrent writer conflicted. Everything else is a defect
/// in the request or in local credentials and configuration (auth plugins,
/// TLS and proxy settings, kubeconfig inference) that will not heal on its
/// own.
pub fn is_retryable_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => is_retryable_status(ae.code),
        kube::Error::HyperError(_)
        | kube::Error::Service(_)
        | kube::Error::ReadEvents(_)
        | kube::Error::Discovery(_) => true,
        _ => false,
    }
}

/// Classify an HTTP status code returned by the API server
pub fn is_retryable_status(code: u16) -> bool {
    match code {
        // NotFound covers "the server could not find the requested resource",
        // i.e. the kind is not served yet
        404 | 409 | 429 => true,
        400..=499 => false,
        500..=599 => true,
        _ => false,
    }
}

/// Check whether every field of `desired` is present with the same value in `live`.
///
/// Objects compare as subsets so that server-populated fields (defaults,
/// status, uid, resourceVersion) do not count as divergence. Arrays compare
/// element-wise and must have the same length.
pub fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(key, value)| have.get(key).is_some_and(|other| is_subset(value, other))),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| is_subset(w, h))
        }
        _ => desired == live,
    }
}

/// Compare a desired manifest against the live object the server holds.
///
/// Only author-controlled content is compared: everything outside
/// `metadata` and `status`, plus `metadata.labels` and `metadata.annotations`.
pub fn matches_live(desired: &Value, live: &Value) -> bool {
    let Some(fields) = desired.as_object() else {
        return desired == live;
    };

    let content_matches = fields
        .iter()
        .filter(|(key, _)| {
            !matches!(key.as_str(), "apiVersion" | "kind" | "metadata" | "status")
        })
        .all(|(key, value)| live.get(key).is_some_and(|other| is_subset(value, other)));

    let metadata_matches = ["labels", "annotations"].iter().all(|field| {
        match desired.pointer(&format!("/metadata/{field}")) {
            Some(want) => live
                .pointer(&format!("/metadata/{field}"))
                .is_some_and(|have| is_subset(want, have)),
            None => true,
        }
    });

    content_matches && metadata_matches
}
