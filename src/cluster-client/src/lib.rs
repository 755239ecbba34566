// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Shared types for the Tern control plane.
//!
//! A *cluster* is an elastic pool of compute backends. Storage ownership
//! (tablets and their replicas) is decoupled from compute: each replica is
//! routed to exactly one backend per cluster at any time. This crate holds
//! the types that cross the boundary between the placement controller, the
//! metadata-service client, and the subsystem that tracks cluster
//! membership and backend liveness.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod id_gen;
mod replica;

pub use id_gen::{Gen, IdAllocator, IdGen};
pub use replica::{AssignmentTier, ClusterAssignment, Replica, ReplicaAssignments};

macro_rules! u64_id_type {
    ($(#[$attr:meta] $name:ident),* $(,)?) => {
        $(
            #[$attr]
            #[derive(
                Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
                Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(pub u64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<u64> for $name {
                fn from(id: u64) -> Self {
                    $name(id)
                }
            }
        )*
    };
}

u64_id_type! {
    /// Identifies a compute backend.
    BackendId,
    /// Identifies a replica of a tablet.
    ReplicaId,
    /// Identifies a tablet, the unit of physical data storage.
    TabletId,
    /// Identifies a database.
    DatabaseId,
    /// Identifies a table.
    TableId,
    /// Identifies a partition of a table.
    PartitionId,
    /// Identifies a materialized index within a partition.
    IndexId,
}

/// Identifies a cluster.
///
/// The metadata service names clusters with opaque string ids; the
/// human-facing cluster *name* is resolved to an id through the
/// [`ClusterRegistry`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        ClusterId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClusterId {
    fn from(id: &str) -> Self {
        ClusterId(id.into())
    }
}

/// A point-in-time snapshot of a compute backend, as reported by the
/// heartbeat subsystem. Owned and updated exclusively by the registry;
/// the control plane only reads it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Backend {
    pub id: BackendId,
    /// Whether the backend's last heartbeat succeeded.
    pub alive: bool,
    /// Whether the backend is accepting queries.
    pub query_available: bool,
    /// Wall-clock time of the last successful heartbeat, in milliseconds
    /// since the Unix epoch.
    pub last_heartbeat_ms: i64,
    /// Whether the backend is the source side of a smooth upgrade and must
    /// be excluded from new placements.
    pub smooth_upgrade_src: bool,
}

/// The operational status of a cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterStatus {
    Normal,
    /// Scaled to zero; the registry can wake it back up on demand.
    Suspended,
    /// Shut down by an operator; auto-start must not resume it.
    ManualShutdown,
    Unknown,
}

/// Read access to cluster membership and backend liveness, plus the
/// auto-start wake-up hook for suspended clusters.
///
/// Implementations are owned by the heartbeat/membership subsystem and
/// must be safe for unsynchronized concurrent reads.
#[async_trait]
pub trait ClusterRegistry: fmt::Debug + Send + Sync {
    /// The backends currently registered in the given cluster, in no
    /// particular order.
    fn backends_in_cluster(&self, cluster_id: &ClusterId) -> Vec<Backend>;

    /// Looks up a single backend by id, across all clusters.
    fn backend(&self, id: BackendId) -> Option<Backend>;

    fn cluster_name_by_id(&self, cluster_id: &ClusterId) -> Option<String>;

    fn cluster_id_by_name(&self, name: &str) -> Option<ClusterId>;

    fn cluster_status(&self, name: &str) -> ClusterStatus;

    /// The names of all registered clusters.
    fn cluster_names(&self) -> BTreeSet<String>;

    /// Requests a wake-up for the named cluster if it is suspended, waiting
    /// until the cluster is usable.
    ///
    /// Returns the name of the cluster that actually came up, which may
    /// differ from `name` if another cluster (e.g. a default pool) took
    /// over, or the empty string if no wake-up took place.
    async fn wait_for_auto_start(&self, name: &str) -> Result<String, anyhow::Error>;
}
