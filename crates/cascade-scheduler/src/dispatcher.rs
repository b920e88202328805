//! Submission of build requests for fired targets.

use cascade_core::Result;
use cascade_core::build::NewBuildRequest;
use cascade_core::change::{ChangeEvent, SourceMetadata};
use cascade_core::ids::{BuildId, BuildRequestId, BuilderName};
use cascade_core::ports::BuildRequester;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Stateless: de-duplication is the barrier's job, not this one's.
#[derive(Clone)]
pub struct TriggerDispatcher {
    requester: Arc<dyn BuildRequester>,
}

impl TriggerDispatcher {
    pub fn new(requester: Arc<dyn BuildRequester>) -> Self {
        Self { requester }
    }

    /// Request one build per target as children of `parent`, carrying the
    /// change metadata forward.
    pub async fn fire(
        &self,
        targets: &BTreeSet<BuilderName>,
        parent: BuildId,
        source: &SourceMetadata,
    ) -> Result<Vec<(BuilderName, BuildRequestId)>> {
        let mut created = Vec::with_capacity(targets.len());
        for target in targets {
            let request = NewBuildRequest {
                builder_name: target.clone(),
                parent_build_id: Some(parent),
                source: source.clone(),
            };
            let request_id = self.requester.request_build(&request).await?;
            info!(
                target = %target,
                parent_build_id = %parent,
                request_id = %request_id,
                revision = %source.revision,
                "Build requested"
            );
            created.push((target.clone(), request_id));
        }
        Ok(created)
    }

    /// Request the root build for an incoming change.
    pub async fn fire_root(&self, root: &BuilderName, event: &ChangeEvent) -> Result<BuildRequestId> {
        let source = event.source();
        let request_id = self
            .requester
            .request_build(&NewBuildRequest {
                builder_name: root.clone(),
                parent_build_id: None,
                source,
            })
            .await?;
        info!(
            root = %root,
            request_id = %request_id,
            changed = %event.source().changed_repo(),
            pull_request = event.is_pull_request(),
            "Root build requested"
        );
        Ok(request_id)
    }
}
