// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Replica descriptors and their per-cluster backend assignments.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::{BackendId, ClusterId, DatabaseId, IndexId, PartitionId, ReplicaId, TableId};

/// One physical copy of a tablet's data.
///
/// A replica is created when its tablet is created and destroyed when the
/// tablet's partition or index is dropped; only its cluster→backend
/// assignments ever change in place.
#[derive(Debug)]
pub struct Replica {
    pub id: ReplicaId,
    pub db_id: DatabaseId,
    pub table_id: TableId,
    pub partition_id: PartitionId,
    pub index_id: IndexId,
    /// The replica's fixed position within its tablet's replica set.
    /// `None` for replicas created before ordinals existed; those fall
    /// back to hashing by replica id.
    pub ordinal: Option<u32>,
    assignments: ReplicaAssignments,
}

impl Replica {
    pub fn new(
        id: ReplicaId,
        db_id: DatabaseId,
        table_id: TableId,
        partition_id: PartitionId,
        index_id: IndexId,
        ordinal: Option<u32>,
    ) -> Self {
        Replica {
            id,
            db_id,
            table_id,
            partition_id,
            index_id,
            ordinal,
            assignments: ReplicaAssignments::default(),
        }
    }

    pub fn assignments(&self) -> &ReplicaAssignments {
        &self.assignments
    }
}

/// Which assignment slot a backend is cached in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignmentTier {
    /// The long-lived slot used when no multi-replica-read mode is active.
    Primary,
    /// The failover slot tried when the primary is unavailable.
    Secondary,
}

/// The cached backend assignments for one (replica, cluster) pair.
///
/// At most one primary and one secondary backend; the sampled list holds
/// up to the configured read fan-out of distinct backends for
/// multi-replica reads.
#[derive(Clone, Debug, Default)]
pub struct ClusterAssignment {
    pub primary: Option<BackendId>,
    pub secondary: Option<BackendId>,
    pub sampled: Vec<BackendId>,
}

/// A replica's assignments, keyed by cluster id.
///
/// Entries are read concurrently by many routing callers and written
/// occasionally by resolution or replay; last write wins. Entries for
/// different replicas are independent, so no cross-replica locking exists.
#[derive(Debug, Default)]
pub struct ReplicaAssignments {
    by_cluster: RwLock<BTreeMap<ClusterId, ClusterAssignment>>,
}

impl ReplicaAssignments {
    /// Returns a snapshot of the assignment for the given cluster.
    pub fn get(&self, cluster_id: &ClusterId) -> Option<ClusterAssignment> {
        self.by_cluster
            .read()
            .expect("lock poisoned")
            .get(cluster_id)
            .cloned()
    }

    /// Overwrites the named tier for the given cluster.
    pub fn set_backend(&self, cluster_id: &ClusterId, tier: AssignmentTier, backend: BackendId) {
        let mut by_cluster = self.by_cluster.write().expect("lock poisoned");
        let assignment = by_cluster.entry(cluster_id.clone()).or_default();
        match tier {
            AssignmentTier::Primary => assignment.primary = Some(backend),
            AssignmentTier::Secondary => assignment.secondary = Some(backend),
        }
    }

    /// Replaces the sampled read fan-out list for the given cluster.
    pub fn set_sampled(&self, cluster_id: &ClusterId, backends: Vec<BackendId>) {
        let mut by_cluster = self.by_cluster.write().expect("lock poisoned");
        by_cluster.entry(cluster_id.clone()).or_default().sampled = backends;
    }
}
