//! Logical scopes and scoped clients
//!
//! One physical API server hosts many isolated logical scopes, selected by
//! the `/clusters/<scope>` URL path prefix. The router derives a client per
//! scope from a single base [`ConnectionDescriptor`] by copying the
//! lightweight config, never by mutating or reopening the base.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use http::header::{HeaderValue, USER_AGENT};
use http::Uri;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::apply::{CreateStatus, KubeRemote, RemoteApi};
use crate::resources::ResourceDocument;
use bootstrapper_common::{Error, ROOT_SCOPE, SCOPE_PATH_PREFIX};

/// Path of an isolated namespace in the control plane, e.g. `root:widgets`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalScope(String);

impl LogicalScope {
    /// The root scope every control plane has
    pub fn root() -> Self {
        Self(ROOT_SCOPE.to_string())
    }

    /// Parse a colon-separated scope path
    ///
    /// Each segment must be lowercase alphanumerics and `-`, not starting or
    /// ending with `-`.
    pub fn parse(path: &str) -> Result<Self, String> {
        if path.is_empty() {
            return Err("scope path is empty".to_string());
        }
        for segment in path.split(':') {
            validate_segment(segment).map_err(|e| format!("invalid scope {path:?}: {e}"))?;
        }
        Ok(Self(path.to_string()))
    }

    /// The scope nested directly below this one
    pub fn child(&self, name: &str) -> Result<Self, String> {
        validate_segment(name).map_err(|e| format!("invalid scope segment {name:?}: {e}"))?;
        Ok(Self(format!("{}:{}", self.0, name)))
    }

    /// The scope path as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_segment(segment: &str) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("empty segment");
    }
    if segment.starts_with('-') || segment.ends_with('-') {
        return Err("segment starts or ends with '-'");
    }
    if !segment
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("segment must be lowercase alphanumerics and '-'");
    }
    Ok(())
}

impl FromStr for LogicalScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LogicalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A connection bound to exactly one logical scope
///
/// Owned by the stage that requested it; never shared across stages.
pub struct ScopedClient {
    scope: LogicalScope,
    caller_tag: String,
    remote: Box<dyn RemoteApi>,
}

impl ScopedClient {
    /// Bind a remote API implementation to a scope
    pub fn new(
        scope: LogicalScope,
        caller_tag: impl Into<String>,
        remote: Box<dyn RemoteApi>,
    ) -> Self {
        Self {
            scope,
            caller_tag: caller_tag.into(),
            remote,
        }
    }

    /// Scope every operation of this client targets
    pub fn scope(&self) -> &LogicalScope {
        &self.scope
    }

    /// Tag identifying the caller to the API server
    pub fn caller_tag(&self) -> &str {
        &self.caller_tag
    }

    /// Create the document in this client's scope unless it already exists
    pub async fn create_if_absent(
        &self,
        document: &ResourceDocument,
    ) -> Result<CreateStatus, Error> {
        self.remote.create_if_absent(document).await
    }
}

impl fmt::Debug for ScopedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedClient")
            .field("scope", &self.scope)
            .field("caller_tag", &self.caller_tag)
            .finish_non_exhaustive()
    }
}

/// Derives scoped clients for the orchestrator
#[cfg_attr(test, automock)]
pub trait ScopeRouter: Send + Sync {
    /// Build a new client bound to `scope`, tagged with `caller_tag`
    fn for_scope(&self, scope: &LogicalScope, caller_tag: &str) -> Result<ScopedClient, Error>;
}

/// Per-call bounds applied to every connection
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// TCP/TLS connect timeout
    pub connect: Duration,
    /// Response read timeout
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: bootstrapper_common::kube_utils::DEFAULT_CONNECT_TIMEOUT,
            read: bootstrapper_common::kube_utils::DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Endpoint, credentials and TLS settings for the API server
///
/// Cheap to clone; holds configuration only, no open transport.
#[derive(Clone)]
pub struct ConnectionDescriptor {
    profile: String,
    config: Config,
}

impl ConnectionDescriptor {
    /// Wrap an existing config, rejecting one without scheme or host
    pub fn new(profile: impl Into<String>, config: Config) -> Result<Self, Error> {
        let profile = profile.into();
        if config.cluster_url.scheme().is_none() || config.cluster_url.authority().is_none() {
            return Err(Error::connection(
                profile,
                format!("cluster URL {} has no scheme or host", config.cluster_url),
            ));
        }
        Ok(Self { profile, config })
    }

    /// Resolve a named kubeconfig context into a descriptor
    ///
    /// Reads `kubeconfig` when given, otherwise `KUBECONFIG` or the default
    /// location.
    pub async fn from_profile(
        kubeconfig: Option<&Path>,
        profile: &str,
        timeouts: Timeouts,
    ) -> Result<Self, Error> {
        let file = match kubeconfig {
            Some(path) => Kubeconfig::read_from(path),
            None => Kubeconfig::read(),
        }
        .map_err(|e| Error::connection(profile, format!("failed to read kubeconfig: {e}")))?;

        let options = KubeConfigOptions {
            context: Some(profile.to_string()),
            ..KubeConfigOptions::default()
        };
        let mut config = Config::from_custom_kubeconfig(file, &options)
            .await
            .map_err(|e| Error::connection(profile, format!("failed to load context: {e}")))?;
        config.connect_timeout = Some(timeouts.connect);
        config.read_timeout = Some(timeouts.read);

        Self::new(profile, config)
    }

    /// Profile (kubeconfig context) this descriptor came from
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// The underlying kube-rs config
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Copy of the config bound to `scope` and tagged with `caller_tag`
    pub fn scoped_config(&self, scope: &LogicalScope, caller_tag: &str) -> Result<Config, Error> {
        let mut config = self.config.clone();
        config.cluster_url = scoped_url(&self.config.cluster_url, scope)
            .map_err(|e| Error::connection(&self.profile, e))?;

        let agent = format!("bootstrapper/{} ({caller_tag})", env!("CARGO_PKG_VERSION"));
        let agent = HeaderValue::from_str(&agent)
            .map_err(|e| Error::connection(&self.profile, format!("invalid caller tag: {e}")))?;
        config.headers.retain(|(name, _)| name != USER_AGENT);
        config.headers.push((USER_AGENT, agent));

        Ok(config)
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("profile", &self.profile)
            .field("cluster_url", &self.config.cluster_url)
            .finish_non_exhaustive()
    }
}

/// Rewrite a server URL so that requests target `scope`
///
/// Any existing `/clusters/...` suffix is replaced; a path prefix in front
/// of it (e.g. behind a reverse proxy) is kept.
pub fn scoped_url(base: &Uri, scope: &LogicalScope) -> Result<Uri, String> {
    let scheme = base
        .scheme_str()
        .ok_or_else(|| format!("cluster URL {base} has no scheme"))?;
    let authority = base
        .authority()
        .ok_or_else(|| format!("cluster URL {base} has no host"))?;

    let path = base.path();
    let prefix = match path.find(SCOPE_PATH_PREFIX) {
        Some(index) => &path[..index],
        None => path,
    }
    .trim_end_matches('/');

    format!("{scheme}://{authority}{prefix}{SCOPE_PATH_PREFIX}{scope}")
        .parse()
        .map_err(|e| format!("invalid scoped URL for {scope}: {e}"))
}

/// Router that builds real kube clients from one base descriptor
#[derive(Debug, Clone)]
pub struct KubeScopeRouter {
    base: ConnectionDescriptor,
}

impl KubeScopeRouter {
    /// Create a router over a base connection
    pub fn new(base: ConnectionDescriptor) -> Self {
        Self { base }
    }
}

impl ScopeRouter for KubeScopeRouter {
    fn for_scope(&self, scope: &LogicalScope, caller_tag: &str) -> Result<ScopedClient, Error> {
        let config = self.base.scoped_config(scope, caller_tag)?;
        debug!(
            scope = %scope,
            caller = %caller_tag,
            url = %config.cluster_url,
            "building scoped client"
        );

        let client = Client::try_from(config).map_err(|e| {
            Error::connection(
                self.base.profile(),
                format!("failed to create client for scope {scope}: {e}"),
            )
        })?;

        Ok(ScopedClient::new(
            scope.clone(),
            caller_tag,
            Box::new(KubeRemote::new(client, scope.clone(), caller_tag)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(url: &str) -> Config {
        Config::new(url.parse().unwrap())
    }

    fn scope(path: &str) -> LogicalScope {
        LogicalScope::parse(path).unwrap()
    }

    #[test]
    fn parses_valid_scopes() {
        assert_eq!(scope("root").as_str(), "root");
        assert_eq!(scope("root:widgets").to_string(), "root:widgets");
        assert_eq!(
            LogicalScope::root().child("consumer-1").unwrap(),
            scope("root:consumer-1")
        );
    }

    #[test]
    fn rejects_invalid_scopes() {
        for bad in ["", "root:", ":root", "Root", "root:-x", "root:x-", "root/widgets"] {
            assert!(LogicalScope::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(LogicalScope::root().child("a:b").is_err());
    }

    #[test]
    fn scoped_url_appends_scope_path() {
        let url = scoped_url(&"https://kcp.example:6443".parse().unwrap(), &scope("root")).unwrap();
        assert_eq!(url.to_string(), "https://kcp.example:6443/clusters/root");
    }

    #[test]
    fn scoped_url_replaces_existing_scope() {
        let base: Uri = "https://kcp.example:6443/clusters/root:other".parse().unwrap();
        let url = scoped_url(&base, &scope("root:widgets")).unwrap();
        assert_eq!(url.to_string(), "https://kcp.example:6443/clusters/root:widgets");
    }

    #[test]
    fn scoped_url_keeps_proxy_prefix() {
        let base: Uri = "https://gw.example/kcp/".parse().unwrap();
        let url = scoped_url(&base, &scope("root")).unwrap();
        assert_eq!(url.to_string(), "https://gw.example/kcp/clusters/root");
    }

    #[test]
    fn descriptor_rejects_url_without_host() {
        let err = ConnectionDescriptor::new("base", base_config("/clusters/root")).unwrap_err();
        assert!(matches!(err, Error::Connection { ref profile, .. } if profile == "base"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn scoped_config_does_not_touch_base() {
        let descriptor =
            ConnectionDescriptor::new("base", base_config("https://kcp.example:6443")).unwrap();

        let root = descriptor.scoped_config(&scope("root"), "bootstrap-root").unwrap();
        let widgets = descriptor
            .scoped_config(&scope("root:widgets"), "bootstrap-widgets")
            .unwrap();

        assert_eq!(descriptor.config().cluster_url.path(), "/");
        assert!(descriptor.config().headers.is_empty());
        assert_eq!(root.cluster_url.path(), "/clusters/root");
        assert_eq!(widgets.cluster_url.path(), "/clusters/root:widgets");

        let agents: Vec<_> = widgets
            .headers
            .iter()
            .filter(|(name, _)| name == USER_AGENT)
            .collect();
        assert_eq!(agents.len(), 1);
        assert!(agents[0].1.to_str().unwrap().contains("bootstrap-widgets"));
    }

    #[test]
    fn scoped_config_rejects_unprintable_tag() {
        let descriptor =
            ConnectionDescriptor::new("base", base_config("https://kcp.example:6443")).unwrap();
        let err = descriptor.scoped_config(&scope("root"), "bad\ntag").unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[tokio::test]
    async fn kube_router_builds_client_bound_to_scope() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let descriptor =
            ConnectionDescriptor::new("base", base_config("https://kcp.example:6443")).unwrap();
        let router = KubeScopeRouter::new(descriptor);

        let client = router.for_scope(&scope("root:widgets"), "bootstrap-widgets").unwrap();
        assert_eq!(client.scope(), &scope("root:widgets"));
        assert_eq!(client.caller_tag(), "bootstrap-widgets");
    }
}
