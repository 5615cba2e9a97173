//! In-memory control plane for tests
//!
//! Tracks objects per logical scope, records every create call, and can be
//! scripted to fail, reject, or hang.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::apply::{CreateStatus, RemoteApi};
use crate::resources::{ResourceDocument, ResourceId, ResourceSet};
use crate::scope::{LogicalScope, ScopeRouter, ScopedClient};
use bootstrapper_common::kube_utils::matches_live;
use bootstrapper_common::Error;

/// Scripted failure returned by the fake
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Retryable(&'static str),
    Fatal(&'static str),
}

impl Failure {
    fn to_error(self, document: &ResourceDocument, scope: &LogicalScope) -> Error {
        let resource = document.id().to_string();
        match self {
            Self::Retryable(msg) => Error::apply_retryable(resource, scope.as_str(), msg),
            Self::Fatal(msg) => Error::apply_fatal(resource, scope.as_str(), msg),
        }
    }
}

#[derive(Default)]
struct State {
    objects: HashMap<LogicalScope, HashMap<ResourceId, Value>>,
    calls: Vec<(LogicalScope, ResourceId)>,
    routed: Vec<(LogicalScope, String)>,
    failures: Option<(usize, Failure)>,
    document_failures: HashMap<String, (usize, Failure)>,
    broken_scopes: HashSet<LogicalScope>,
    hang: bool,
}

/// Fake control plane shared by every client it hands out
#[derive(Clone, Default)]
pub struct FakeControlPlane {
    state: Arc<Mutex<State>>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Client bound to `scope`, bypassing the router bookkeeping
    pub fn client(&self, scope: &LogicalScope) -> ScopedClient {
        ScopedClient::new(
            scope.clone(),
            "test",
            Box::new(FakeRemote {
                state: self.state.clone(),
                scope: scope.clone(),
            }),
        )
    }

    /// Store an object as if someone else created it
    pub fn seed(&self, scope: &LogicalScope, id: &ResourceId, body: Value) {
        self.lock()
            .objects
            .entry(scope.clone())
            .or_default()
            .insert(id.clone(), body);
    }

    pub fn get(&self, scope: &LogicalScope, id: &ResourceId) -> Option<Value> {
        self.lock()
            .objects
            .get(scope)
            .and_then(|objects| objects.get(id).cloned())
    }

    pub fn object_count(&self, scope: &LogicalScope) -> usize {
        self.lock().objects.get(scope).map_or(0, HashMap::len)
    }

    /// Every create call seen, in order
    pub fn calls(&self) -> Vec<(LogicalScope, ResourceId)> {
        self.lock().calls.clone()
    }

    /// Every scoped client requested through the router, in order
    pub fn routed(&self) -> Vec<(LogicalScope, String)> {
        self.lock().routed.clone()
    }

    /// Fail the next `count` create calls; `usize::MAX` fails forever
    pub fn fail_next(&self, count: usize, failure: Failure) {
        self.lock().failures = Some((count, failure));
    }

    /// Fail the next `count` create calls for documents named `name`
    pub fn fail_document(&self, name: &str, count: usize, failure: Failure) {
        self.lock()
            .document_failures
            .insert(name.to_string(), (count, failure));
    }

    /// Reject any document with this name as fatally invalid
    pub fn reject(&self, name: &str, message: &'static str) {
        self.fail_document(name, usize::MAX, Failure::Fatal(message));
    }

    /// Make the router fail for `scope`
    pub fn break_scope(&self, scope: &LogicalScope) {
        self.lock().broken_scopes.insert(scope.clone());
    }

    /// Make create calls block forever
    pub fn hang_writes(&self, hang: bool) {
        self.lock().hang = hang;
    }
}

impl ScopeRouter for FakeControlPlane {
    fn for_scope(&self, scope: &LogicalScope, caller_tag: &str) -> Result<ScopedClient, Error> {
        let mut state = self.lock();
        state.routed.push((scope.clone(), caller_tag.to_string()));
        if state.broken_scopes.contains(scope) {
            return Err(Error::connection("fake", format!("scope {scope} unreachable")));
        }
        drop(state);

        Ok(ScopedClient::new(
            scope.clone(),
            caller_tag,
            Box::new(FakeRemote {
                state: self.state.clone(),
                scope: scope.clone(),
            }),
        ))
    }
}

struct FakeRemote {
    state: Arc<Mutex<State>>,
    scope: LogicalScope,
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn create_if_absent(&self, document: &ResourceDocument) -> Result<CreateStatus, Error> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.calls.push((self.scope.clone(), document.id().clone()));
            state.hang
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let scripted = state
            .document_failures
            .get_mut(document.name())
            .into_iter()
            .chain(state.failures.as_mut());
        for (remaining, failure) in scripted {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(failure.to_error(document, &self.scope));
            }
        }

        let objects = state.objects.entry(self.scope.clone()).or_default();
        match objects.get(document.id()) {
            Some(live) if matches_live(document.body(), live) => Ok(CreateStatus::Unchanged),
            Some(_) => Ok(CreateStatus::Diverged),
            None => {
                objects.insert(document.id().clone(), document.body().clone());
                Ok(CreateStatus::Created)
            }
        }
    }
}

/// A set of namespaced Widget documents with the given names, in order
pub fn widget_set(names: &[&str]) -> ResourceSet {
    let yaml = names
        .iter()
        .map(|name| {
            format!(
                "apiVersion: data.my.domain/v1alpha1\nkind: Widget\n\
                 metadata:\n  name: {name}\n  namespace: widgets\nspec:\n  foo: {name}\n"
            )
        })
        .collect::<Vec<_>>()
        .join("---\n");
    ResourceSet::from_yaml("widgets", &yaml).unwrap()
}
