// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! In-memory fakes for the resolver's capability traits.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::anyhow;
use async_trait::async_trait;
use tern_cluster_client::{
    Backend, BackendId, ClusterId, ClusterRegistry, ClusterStatus, TableId,
};

use crate::placement::now_ms;
use crate::{ClusterAccessControl, ColocateIndex};

pub(crate) fn alive_backend(id: u64) -> Backend {
    Backend {
        id: BackendId(id),
        alive: true,
        query_available: true,
        last_heartbeat_ms: now_ms(),
        smooth_upgrade_src: false,
    }
}

/// Dead, heartbeat-stale beyond any heartbeat interval.
pub(crate) fn dead_backend(id: u64) -> Backend {
    Backend {
        id: BackendId(id),
        alive: false,
        query_available: false,
        last_heartbeat_ms: 0,
        smooth_upgrade_src: false,
    }
}

/// Dead, but heartbeat-stale by only `stale_ms`.
pub(crate) fn stale_backend(id: u64, stale_ms: i64) -> Backend {
    Backend {
        id: BackendId(id),
        alive: false,
        query_available: false,
        last_heartbeat_ms: now_ms() - stale_ms,
        smooth_upgrade_src: false,
    }
}

pub(crate) fn upgrading_backend(id: u64) -> Backend {
    Backend {
        smooth_upgrade_src: true,
        ..alive_backend(id)
    }
}

/// A fixed-membership [`ClusterRegistry`]. Cluster `name` maps to id
/// `id-{name}`.
#[derive(Debug, Default)]
pub(crate) struct StaticRegistry {
    backends: BTreeMap<ClusterId, Vec<Backend>>,
    names_to_ids: BTreeMap<String, ClusterId>,
    statuses: BTreeMap<String, ClusterStatus>,
    auto_start: BTreeMap<String, String>,
    auto_start_error: bool,
}

impl StaticRegistry {
    pub fn with_backends(name: &str, backends: Vec<Backend>) -> Self {
        let mut registry = StaticRegistry::default();
        let cluster_id = ClusterId::new(format!("id-{name}"));
        registry.names_to_ids.insert(name.into(), cluster_id.clone());
        registry.backends.insert(cluster_id, backends);
        registry
    }

    pub fn with_status(mut self, name: &str, status: ClusterStatus) -> Self {
        self.statuses.insert(name.into(), status);
        self
    }

    /// Wake-ups for `requested` report that `resolved` took over.
    pub fn with_auto_start_target(mut self, requested: &str, resolved: &str) -> Self {
        self.auto_start.insert(requested.into(), resolved.into());
        self
    }

    pub fn with_auto_start_error(mut self) -> Self {
        self.auto_start_error = true;
        self
    }
}

#[async_trait]
impl ClusterRegistry for StaticRegistry {
    fn backends_in_cluster(&self, cluster_id: &ClusterId) -> Vec<Backend> {
        self.backends.get(cluster_id).cloned().unwrap_or_default()
    }

    fn backend(&self, id: BackendId) -> Option<Backend> {
        self.backends
            .values()
            .flatten()
            .find(|be| be.id == id)
            .cloned()
    }

    fn cluster_name_by_id(&self, cluster_id: &ClusterId) -> Option<String> {
        self.names_to_ids
            .iter()
            .find(|(_, id)| *id == cluster_id)
            .map(|(name, _)| name.clone())
    }

    fn cluster_id_by_name(&self, name: &str) -> Option<ClusterId> {
        self.names_to_ids.get(name).cloned()
    }

    fn cluster_status(&self, name: &str) -> ClusterStatus {
        self.statuses
            .get(name)
            .copied()
            .unwrap_or(ClusterStatus::Normal)
    }

    fn cluster_names(&self) -> BTreeSet<String> {
        self.names_to_ids.keys().cloned().collect()
    }

    async fn wait_for_auto_start(&self, name: &str) -> Result<String, anyhow::Error> {
        if self.auto_start_error {
            return Err(anyhow!("cluster {name} cannot be resumed"));
        }
        Ok(self.auto_start.get(name).cloned().unwrap_or_default())
    }
}

#[derive(Debug)]
pub(crate) struct AllowAll;

impl ClusterAccessControl for AllowAll {
    fn check_cluster_usage(&self, _user: &str, _cluster: &str) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct DenyAll;

impl ClusterAccessControl for DenyAll {
    fn check_cluster_usage(&self, user: &str, cluster: &str) -> Result<(), anyhow::Error> {
        Err(anyhow!("user {user} has no USAGE privilege on {cluster}"))
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct StaticColocateIndex {
    tables: BTreeSet<TableId>,
}

impl StaticColocateIndex {
    pub fn new(tables: impl IntoIterator<Item = TableId>) -> Self {
        StaticColocateIndex {
            tables: tables.into_iter().collect(),
        }
    }
}

impl ColocateIndex for StaticColocateIndex {
    fn is_colocated_table(&self, table_id: TableId) -> bool {
        self.tables.contains(&table_id)
    }
}
