// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Replica placement for elastic compute clusters.
//!
//! The query and DDL layers ask [`BackendResolver::resolve_backend`] for a
//! backend id for a given replica within a caller-selected cluster. The
//! resolver consults the replica's cached assignments and the
//! [`ClusterRegistry`](tern_cluster_client::ClusterRegistry), falling back
//! to deterministic hashing when no cached backend is healthy.
//! [`AssignmentCache`] keeps per-replica assignment state consistent
//! across control-plane restarts by replaying assignment-update events
//! from the replicated operation log.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tern_cluster_client::TableId;

mod assignment;
mod error;
mod placement;

#[cfg(test)]
pub(crate) mod testutil;

pub use assignment::{AssignmentCache, AssignmentUpdate};
pub use error::ClusterError;
pub use placement::{BackendResolver, CACHED_ASSIGNMENT_POINT};

/// Configures replica placement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// The expected interval between backend heartbeats. A backend whose
    /// heartbeat is stale by at most this much is still eligible for
    /// placement, tolerating brief restarts.
    pub heartbeat_interval: Duration,
    /// Whether reads fan out over several sampled backends per replica.
    pub enable_multi_replica_read: bool,
    /// The read fan-out when multi-replica read is enabled.
    pub replica_num: usize,
    /// Percentage of reads, in `[0, 100)`, allowed to go cold (served by a
    /// freshly sampled backend instead of the cached primary).
    pub cold_read_percent: u32,
    /// When set, a freshly hashed backend immediately becomes the
    /// replica's primary; otherwise it lands in the secondary tier so the
    /// primary is not disturbed by transient churn.
    pub enable_immediate_backend_assign: bool,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        PlacementConfig {
            heartbeat_interval: Duration::from_secs(5),
            enable_multi_replica_read: false,
            replica_num: 3,
            cold_read_percent: 10,
            enable_immediate_backend_assign: false,
        }
    }
}

/// The session-scoped inputs to cluster resolution.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    pub user: String,
    /// A cluster named explicitly by the caller (e.g. a session variable).
    pub explicit_cluster: Option<String>,
    /// The cluster derived from session defaults.
    pub default_cluster: Option<String>,
}

/// Checks whether a user may route queries to a cluster.
pub trait ClusterAccessControl: fmt::Debug + Send + Sync {
    fn check_cluster_usage(&self, user: &str, cluster: &str) -> Result<(), anyhow::Error>;
}

/// Membership of tables in colocation groups.
///
/// Same-ordinal replicas of colocated tables must land on the same
/// backend, so the resolver bypasses all assignment caches for them.
pub trait ColocateIndex: fmt::Debug + Send + Sync {
    fn is_colocated_table(&self, table_id: TableId) -> bool;
}

/// Externally toggled fault injection for resolver decision points.
///
/// Only named points consulted by the resolver react to it, and only when
/// explicitly enabled (typically by a test harness over an admin
/// endpoint).
#[derive(Clone, Debug, Default)]
pub struct FaultInjector {
    points: Arc<RwLock<BTreeSet<String>>>,
}

impl FaultInjector {
    pub fn enable(&self, point: &str) {
        self.points
            .write()
            .expect("lock poisoned")
            .insert(point.into());
    }

    pub fn disable(&self, point: &str) {
        self.points.write().expect("lock poisoned").remove(point);
    }

    pub fn is_enabled(&self, point: &str) -> bool {
        self.points.read().expect("lock poisoned").contains(point)
    }
}
