//! Remote API implementation over a kube-rs client
//!
//! Kinds are resolved through API discovery rather than a compiled-in type
//! registry, so a kind whose schema is not installed yet shows up as a
//! retryable discovery miss instead of a hard failure.

use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::{Api, DynamicObject, GroupVersionKind, PostParams};
use kube::discovery::{pinned_kind, ApiResource, Scope};
use kube::Client;
use tracing::{debug, trace, warn};

use super::{CreateStatus, RemoteApi};
use crate::resources::{ResourceDocument, DEFAULT_NAMESPACE};
use crate::scope::LogicalScope;
use bootstrapper_common::kube_utils::{
    is_already_exists, is_retryable_kube_error, matches_live, parse_api_version,
};
use bootstrapper_common::Error;

/// Resolved API resource and whether it is namespaced
type Resolved = (ApiResource, bool);

/// [`RemoteApi`] backed by a kube client bound to one logical scope
pub struct KubeRemote {
    client: Client,
    scope: LogicalScope,
    field_manager: String,
    /// apiVersion/kind -> resolved resource, filled lazily
    resources: DashMap<String, Resolved>,
}

impl KubeRemote {
    /// Wrap a client already bound to `scope`
    pub fn new(client: Client, scope: LogicalScope, field_manager: &str) -> Self {
        Self {
            client,
            scope,
            field_manager: field_manager.to_string(),
            resources: DashMap::new(),
        }
    }

    fn error(&self, document: &ResourceDocument, err: kube::Error) -> Error {
        let resource = document.id().to_string();
        if is_retryable_kube_error(&err) {
            Error::apply_retryable(resource, self.scope.as_str(), err.to_string())
        } else {
            Error::apply_fatal(resource, self.scope.as_str(), err.to_string())
        }
    }

    async fn resolve(&self, document: &ResourceDocument) -> Result<Resolved, Error> {
        let key = format!("{}/{}", document.api_version(), document.kind());
        if let Some(resolved) = self.resources.get(&key) {
            return Ok(resolved.value().clone());
        }

        let (group, version) = parse_api_version(document.api_version());
        let gvk = GroupVersionKind::gvk(&group, &version, document.kind());
        let (resource, capabilities) = pinned_kind(&self.client, &gvk).await.map_err(|e| {
            trace!(scope = %self.scope, kind = %document.kind(), error = %e, "kind not served");
            self.error(document, e)
        })?;

        let resolved = (resource, capabilities.scope == Scope::Namespaced);
        debug!(scope = %self.scope, key = %key, namespaced = resolved.1, "resolved API resource");
        self.resources.insert(key, resolved.clone());
        Ok(resolved)
    }

    fn api_for(&self, document: &ResourceDocument, resolved: &Resolved) -> Api<DynamicObject> {
        let (resource, namespaced) = resolved;
        if *namespaced {
            let namespace = document.namespace().unwrap_or(DEFAULT_NAMESPACE);
            Api::namespaced_with(self.client.clone(), namespace, resource)
        } else {
            Api::all_with(self.client.clone(), resource)
        }
    }

    async fn compare_with_live(
        &self,
        api: &Api<DynamicObject>,
        document: &ResourceDocument,
    ) -> Result<CreateStatus, Error> {
        let live = api.get(document.name()).await;
        existing_status(document, &self.scope, live)
    }
}

/// Status of a document whose create hit an existing object, given the
/// follow-up read of that object.
///
/// The object exists either way, so only a read failure that may heal is an
/// error. A read the caller is not allowed to make (e.g. create-only RBAC)
/// leaves the content uncompared.
fn existing_status(
    document: &ResourceDocument,
    scope: &LogicalScope,
    live: Result<DynamicObject, kube::Error>,
) -> Result<CreateStatus, Error> {
    let object = match live {
        Ok(object) => object,
        Err(e) if is_retryable_kube_error(&e) => {
            return Err(Error::apply_retryable(
                document.id().to_string(),
                scope.as_str(),
                e.to_string(),
            ));
        }
        Err(e) => {
            warn!(
                scope = %scope,
                resource = %document.id(),
                error = %e,
                "resource exists but cannot be read, content not compared"
            );
            return Ok(CreateStatus::Present);
        }
    };

    match serde_json::to_value(&object) {
        Ok(live) if matches_live(document.body(), &live) => Ok(CreateStatus::Unchanged),
        Ok(_) => Ok(CreateStatus::Diverged),
        Err(e) => {
            warn!(
                scope = %scope,
                resource = %document.id(),
                error = %e,
                "failed to encode live object, content not compared"
            );
            Ok(CreateStatus::Present)
        }
    }
}

#[async_trait]
impl RemoteApi for KubeRemote {
    async fn create_if_absent(&self, document: &ResourceDocument) -> Result<CreateStatus, Error> {
        let resolved = self.resolve(document).await?;
        let api = self.api_for(document, &resolved);

        let object: DynamicObject =
            serde_json::from_value(document.body().clone()).map_err(|e| {
                Error::apply_fatal(
                    document.id().to_string(),
                    self.scope.as_str(),
                    format!("document is not a valid object: {e}"),
                )
            })?;
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..PostParams::default()
        };

        match api.create(&params, &object).await {
            Ok(_) => Ok(CreateStatus::Created),
            Err(e) if is_already_exists(&e) => self.compare_with_live(&api, document).await,
            Err(e) => Err(self.error(document, e)),
        }
    }
}
