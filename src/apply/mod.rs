//! Declarative applier
//!
//! Creates every document of a [`ResourceSet`] through a [`ScopedClient`], in
//! declared order, with ensure-presence semantics: a document that already
//! exists counts as applied whether or not its content still matches, and is
//! never overwritten.
//!
//! The first failing document ends the attempt. Later documents may depend
//! on earlier ones, so the caller retries the whole set rather than resuming.

pub mod remote;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::resources::{ResourceDocument, ResourceSet};
use crate::scope::ScopedClient;
use bootstrapper_common::Error;

pub use remote::KubeRemote;

/// Result of a create-if-absent call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStatus {
    /// The document did not exist and was created
    Created,
    /// The document already exists with matching content
    Unchanged,
    /// The document already exists with different content; left untouched
    Diverged,
    /// The document already exists but its content could not be read back
    Present,
}

/// Remote API surface the applier depends on
///
/// Implementations are bound to one logical scope. Errors must be classified:
/// [`Error::apply_retryable`] for conditions that heal as the control plane
/// converges, [`Error::apply_fatal`] for everything else.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create the document unless an object with the same identity exists
    async fn create_if_absent(&self, document: &ResourceDocument) -> Result<CreateStatus, Error>;
}

/// Counts from one successful pass over a resource set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Documents created by this pass
    pub created: usize,
    /// Documents that already existed unchanged
    pub unchanged: usize,
    /// Documents that already existed with different content
    pub diverged: usize,
    /// Documents that already existed and could not be compared
    pub present: usize,
}

impl ApplySummary {
    fn record(&mut self, status: CreateStatus) {
        match status {
            CreateStatus::Created => self.created += 1,
            CreateStatus::Unchanged => self.unchanged += 1,
            CreateStatus::Diverged => self.diverged += 1,
            CreateStatus::Present => self.present += 1,
        }
    }

    /// Total documents the pass covered
    pub fn total(&self) -> usize {
        self.created + self.unchanged + self.diverged + self.present
    }
}

/// Apply every document of `set` through `client`, in order.
///
/// Returns on the first error, retryable or fatal, without touching the
/// remaining documents. Cancellation is checked before each write and
/// abandons a write that is still in flight.
pub async fn apply_resource_set(
    client: &ScopedClient,
    set: &ResourceSet,
    cancel: &CancellationToken,
) -> Result<ApplySummary, Error> {
    let mut summary = ApplySummary::default();

    for document in set.documents() {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!("apply of {}", set.name())));
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::cancelled(format!("create of {}", document.id())));
            }
            result = client.create_if_absent(document) => result?,
        };

        match status {
            CreateStatus::Created => {
                info!(scope = %client.scope(), resource = %document.id(), "created resource");
            }
            CreateStatus::Unchanged | CreateStatus::Present => {
                debug!(
                    scope = %client.scope(),
                    resource = %document.id(),
                    "resource already present"
                );
            }
            CreateStatus::Diverged => {
                warn!(
                    scope = %client.scope(),
                    resource = %document.id(),
                    "resource exists with different content, leaving it as is"
                );
            }
        }
        summary.record(status);
    }

    Ok(summary)
}
