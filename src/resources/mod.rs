//! Embedded resource sets
//!
//! Each set is a directory of YAML manifests bundled into the binary. Files
//! are read in name order and documents within a file in stream order; that
//! combined order is the order the applier creates them in.
//!
//! Sets are validated once when loaded. A malformed manifest is a build
//! defect, so loading fails fast with [`Error::Load`] and is never retried.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use bootstrapper_common::kube_utils::parse_api_version;
use bootstrapper_common::yaml::parse_documents;
use bootstrapper_common::Error;

/// Namespace the API server assigns to namespaced documents that omit one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Name of the set holding the exported API schemas
pub const SCHEMAS_SET: &str = "schemas";
/// Name of the set holding the workload scope itself
pub const WORKSPACES_SET: &str = "workspaces";
/// Name of the set holding resources owned by the workload scope
pub const WIDGETS_SET: &str = "widgets";
/// Name of the set holding consumer-facing scopes
pub const CONSUMERS_SET: &str = "consumers";

const SCHEMA_SOURCES: &[(&str, &str)] = &[(
    "widgets-schema.yaml",
    include_str!("assets/schemas/widgets-schema.yaml"),
)];

const WORKSPACE_SOURCES: &[(&str, &str)] = &[(
    "widgets-workspace.yaml",
    include_str!("assets/workspaces/widgets-workspace.yaml"),
)];

const WIDGET_SOURCES: &[(&str, &str)] = &[
    ("widgets.yaml", include_str!("assets/widgets/widgets.yaml")),
    (
        "00-apibinding.yaml",
        include_str!("assets/widgets/00-apibinding.yaml"),
    ),
    (
        "01-namespace.yaml",
        include_str!("assets/widgets/01-namespace.yaml"),
    ),
];

const CONSUMER_SOURCES: &[(&str, &str)] = &[(
    "consumers.yaml",
    include_str!("assets/consumers/consumers.yaml"),
)];

/// Identity of a document within one logical scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    /// API group, empty for the core group
    pub group: String,
    /// Resource kind
    pub kind: String,
    /// Namespace, for namespaced documents
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind)?;
        if !self.group.is_empty() {
            write!(f, ".{}", self.group)?;
        }
        write!(
            f,
            "/{}/{}",
            self.namespace.as_deref().unwrap_or(""),
            self.name
        )
    }
}

/// One declarative document, validated at load time and immutable afterwards
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDocument {
    api_version: String,
    id: ResourceId,
    body: Value,
}

impl ResourceDocument {
    /// Validate a decoded manifest
    ///
    /// Requires a mapping with non-empty `apiVersion`, `kind` and
    /// `metadata.name` strings; `metadata.namespace` must be a string when set.
    pub fn from_value(body: Value) -> Result<Self, String> {
        if !body.is_object() {
            return Err("document is not a mapping".to_string());
        }

        let required = |pointer: &str| -> Result<String, String> {
            match body.pointer(pointer) {
                Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
                Some(Value::String(_)) => Err(format!("{pointer} is empty")),
                Some(_) => Err(format!("{pointer} is not a string")),
                None => Err(format!("missing {pointer}")),
            }
        };

        let api_version = required("/apiVersion")?;
        let kind = required("/kind")?;
        let name = required("/metadata/name")?;
        let namespace = match body.pointer("/metadata/namespace") {
            None | Some(Value::Null) => None,
            Some(Value::String(ns)) if !ns.is_empty() => Some(ns.clone()),
            Some(_) => return Err("/metadata/namespace is not a non-empty string".to_string()),
        };

        let (group, _) = parse_api_version(&api_version);

        Ok(Self {
            api_version,
            id: ResourceId {
                group,
                kind,
                namespace,
                name,
            },
            body,
        })
    }

    /// The document's apiVersion (`group/version` or `version`)
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// The document's kind
    pub fn kind(&self) -> &str {
        &self.id.kind
    }

    /// The document's name
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// The document's namespace, if it declares one
    pub fn namespace(&self) -> Option<&str> {
        self.id.namespace.as_deref()
    }

    /// The document's identity
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// The full desired manifest
    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// An ordered, immutable collection of documents applied together
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSet {
    name: String,
    documents: Vec<ResourceDocument>,
}

impl ResourceSet {
    /// Load a set from one multi-document YAML stream
    pub fn from_yaml(name: impl Into<String>, yaml: &str) -> Result<Self, Error> {
        let name = name.into();
        let mut documents = Vec::new();
        push_documents(&name, "<inline>", yaml, &mut documents)?;
        Self::new(name, documents)
    }

    /// Load a set from named YAML files, applied in file-name order
    pub fn from_sources(name: impl Into<String>, sources: &[(&str, &str)]) -> Result<Self, Error> {
        let name = name.into();
        let mut sorted: Vec<&(&str, &str)> = sources.iter().collect();
        sorted.sort_by_key(|(file, _)| *file);

        let mut documents = Vec::new();
        for (file, yaml) in sorted {
            push_documents(&name, file, yaml, &mut documents)?;
        }
        Self::new(name, documents)
    }

    /// Documents collide when they would name the same object once the
    /// server defaults a missing namespace. Versions of one group share
    /// storage, so the version is not part of the key.
    fn new(name: String, documents: Vec<ResourceDocument>) -> Result<Self, Error> {
        let mut seen = HashSet::with_capacity(documents.len());
        for doc in &documents {
            let id = doc.id();
            let key = (
                id.group.as_str(),
                id.kind.as_str(),
                id.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE),
                id.name.as_str(),
            );
            if !seen.insert(key) {
                return Err(Error::load(&name, format!("duplicate document {}", doc.id())));
            }
        }
        Ok(Self { name, documents })
    }

    /// Name of the set, used in logs and errors
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Documents in application order
    pub fn documents(&self) -> &[ResourceDocument] {
        &self.documents
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the set has no documents
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn push_documents(
    set: &str,
    file: &str,
    yaml: &str,
    out: &mut Vec<ResourceDocument>,
) -> Result<(), Error> {
    let values = parse_documents(yaml)
        .map_err(|e| Error::load(set, format!("{file}: invalid YAML: {e}")))?;
    for (index, value) in values.into_iter().enumerate() {
        let doc = ResourceDocument::from_value(value)
            .map_err(|e| Error::load(set, format!("{file}: document {index}: {e}")))?;
        out.push(doc);
    }
    Ok(())
}

/// The resource sets bundled with the binary
#[derive(Debug, Clone)]
pub struct BundledSets {
    /// API schemas and the export publishing them, applied to the root scope first
    pub schemas: Arc<ResourceSet>,
    /// The workload scope, applied to the root scope
    pub workspaces: Arc<ResourceSet>,
    /// Binding to the exported schemas, then the instances owned by the
    /// workload scope
    pub widgets: Arc<ResourceSet>,
    /// Consumer-facing scopes, applied to the root scope last
    pub consumers: Arc<ResourceSet>,
}

impl BundledSets {
    /// Load and validate every bundled set
    pub fn load() -> Result<Self, Error> {
        Ok(Self {
            schemas: Arc::new(ResourceSet::from_sources(SCHEMAS_SET, SCHEMA_SOURCES)?),
            workspaces: Arc::new(ResourceSet::from_sources(
                WORKSPACES_SET,
                WORKSPACE_SOURCES,
            )?),
            widgets: Arc::new(ResourceSet::from_sources(WIDGETS_SET, WIDGET_SOURCES)?),
            consumers: Arc::new(ResourceSet::from_sources(CONSUMERS_SET, CONSUMER_SOURCES)?),
        })
    }
}
