// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The control plane's view of replica assignments, and replay of
//! persisted assignment updates.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tern_cluster_client::{
    AssignmentTier, BackendId, ClusterId, ClusterRegistry, Replica, ReplicaId, TabletId,
};
use tracing::{debug, warn};

/// A persisted assignment-update event from the replicated operation log.
///
/// The event names its cluster by *name* (ids may not have existed when it
/// was written); replay translates the name back to an id when a mapping
/// is available.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AssignmentUpdate {
    /// An update for a single replica of a single tablet.
    Single {
        cluster: String,
        tablet_id: TabletId,
        replica_id: ReplicaId,
        backend_id: BackendId,
    },
    /// Parallel updates for a list of tablets; `backend_ids[i]` applies to
    /// the replica of `tablet_ids[i]`.
    Batch {
        cluster: String,
        tablet_ids: Vec<TabletId>,
        backend_ids: Vec<BackendId>,
    },
}

/// All replicas known to the control plane, indexed for routing and
/// replay.
///
/// Entries are independent; concurrent routing reads race freely with the
/// single replay path, and a fresh hash-based assignment may overwrite a
/// replayed one. The metadata service, not this cache, is the durability
/// authority.
#[derive(Debug, Default)]
pub struct AssignmentCache {
    replicas: RwLock<BTreeMap<ReplicaId, Arc<Replica>>>,
    tablets: RwLock<BTreeMap<TabletId, ReplicaId>>,
}

impl AssignmentCache {
    /// Registers a replica under its tablet.
    pub fn insert(&self, tablet_id: TabletId, replica: Arc<Replica>) {
        self.tablets
            .write()
            .expect("lock poisoned")
            .insert(tablet_id, replica.id);
        self.replicas
            .write()
            .expect("lock poisoned")
            .insert(replica.id, replica);
    }

    /// Drops the replica registered under `tablet_id`, if any.
    pub fn remove(&self, tablet_id: TabletId) {
        let replica_id = self.tablets.write().expect("lock poisoned").remove(&tablet_id);
        if let Some(replica_id) = replica_id {
            self.replicas
                .write()
                .expect("lock poisoned")
                .remove(&replica_id);
        }
    }

    pub fn replica(&self, replica_id: ReplicaId) -> Option<Arc<Replica>> {
        self.replicas
            .read()
            .expect("lock poisoned")
            .get(&replica_id)
            .map(Arc::clone)
    }

    pub fn replica_for_tablet(&self, tablet_id: TabletId) -> Option<Arc<Replica>> {
        let replica_id = *self.tablets.read().expect("lock poisoned").get(&tablet_id)?;
        self.replica(replica_id)
    }

    /// Overwrites the named assignment tier for one replica;
    /// last write wins, no versioning.
    pub fn update(
        &self,
        replica_id: ReplicaId,
        cluster_id: &ClusterId,
        backend_id: BackendId,
        tier: AssignmentTier,
    ) -> bool {
        match self.replica(replica_id) {
            Some(replica) => {
                replica.assignments().set_backend(cluster_id, tier, backend_id);
                true
            }
            None => {
                warn!(%replica_id, "assignment update for unknown replica");
                false
            }
        }
    }

    /// Applies a persisted assignment update to the primary tier of each
    /// affected replica.
    ///
    /// Safe to apply out of order relative to live resolution: no ordering
    /// is guaranteed between replay and concurrent fresh assignments, and
    /// eventual convergence is acceptable.
    pub fn replay(&self, update: &AssignmentUpdate, registry: &dyn ClusterRegistry) {
        match update {
            AssignmentUpdate::Single {
                cluster,
                tablet_id,
                replica_id,
                backend_id,
            } => {
                let cluster_id = self.translate_cluster(cluster, registry);
                debug!(%cluster, %tablet_id, %replica_id, %backend_id, "replay single assignment");
                self.update(*replica_id, &cluster_id, *backend_id, AssignmentTier::Primary);
            }
            AssignmentUpdate::Batch {
                cluster,
                tablet_ids,
                backend_ids,
            } => {
                if tablet_ids.len() != backend_ids.len() {
                    warn!(
                        %cluster,
                        tablets = tablet_ids.len(),
                        backends = backend_ids.len(),
                        "assignment update with mismatched lists"
                    );
                }
                let cluster_id = self.translate_cluster(cluster, registry);
                for (tablet_id, backend_id) in tablet_ids.iter().zip(backend_ids.iter()) {
                    let Some(replica) = self.replica_for_tablet(*tablet_id) else {
                        warn!(%tablet_id, "assignment update for unknown tablet");
                        continue;
                    };
                    debug!(%cluster, %tablet_id, replica = %replica.id, %backend_id, "replay assignment");
                    replica.assignments().set_backend(
                        &cluster_id,
                        AssignmentTier::Primary,
                        *backend_id,
                    );
                }
            }
        }
    }

    /// Translates a persisted cluster name to an id, falling back to the
    /// verbatim name when no translation is available.
    fn translate_cluster(&self, cluster: &str, registry: &dyn ClusterRegistry) -> ClusterId {
        match registry.cluster_id_by_name(cluster) {
            Some(id) => id,
            None => ClusterId::new(cluster),
        }
    }
}
