// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The replica→backend placement algorithm.

use std::io::Cursor;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tern_cluster_client::{
    AssignmentTier, Backend, BackendId, ClusterId, ClusterRegistry, ClusterStatus, Replica,
};
use tracing::{debug, info, warn};

use crate::{
    ClusterAccessControl, ClusterError, ColocateIndex, FaultInjector, PlacementConfig,
    SessionContext,
};

/// Fault injection point that makes resolution fail right after the cached
/// assignment tiers have been tried, instead of falling back to hashing.
pub const CACHED_ASSIGNMENT_POINT: &str = "resolver.cached_assignments";

/// Routes replicas to live backends within a caller-selected cluster.
///
/// Resolution is deterministic for a fixed (partition, ordinal) pair and
/// an unchanged eligible-backend set; it never returns a dead backend.
/// Many worker tasks call [`BackendResolver::resolve_backend`] concurrently;
/// per-replica assignment state is the only shared mutable resource.
#[derive(Debug)]
pub struct BackendResolver {
    registry: Arc<dyn ClusterRegistry>,
    colocate: Arc<dyn ColocateIndex>,
    access: Arc<dyn ClusterAccessControl>,
    config: PlacementConfig,
    faults: FaultInjector,
}

impl BackendResolver {
    pub fn new(
        registry: Arc<dyn ClusterRegistry>,
        colocate: Arc<dyn ColocateIndex>,
        access: Arc<dyn ClusterAccessControl>,
        config: PlacementConfig,
    ) -> Self {
        BackendResolver {
            registry,
            colocate,
            access,
            config,
            faults: FaultInjector::default(),
        }
    }

    /// Returns a handle for toggling the resolver's fault injection points.
    pub fn fault_injector(&self) -> FaultInjector {
        self.faults.clone()
    }

    /// Resolves a backend for `replica` using the caller's session context.
    ///
    /// An explicitly named cluster requires usage privilege on it; absent
    /// one, the session's default cluster is used. Resolution outside a
    /// session fails with [`ClusterError::ConnectionContextNotSet`].
    pub async fn resolve_backend(
        &self,
        replica: &Replica,
        session: Option<&SessionContext>,
    ) -> Result<BackendId, ClusterError> {
        let Some(session) = session else {
            debug!(replica = %replica.id, "resolution attempted without a connection context");
            return Err(ClusterError::ConnectionContextNotSet);
        };

        let cluster = if let Some(name) = &session.explicit_cluster {
            if let Err(e) = self.access.check_cluster_usage(&session.user, name) {
                warn!(user = %session.user, cluster = %name, "cluster usage check failed: {e:#}");
                return Err(ClusterError::NotAuthorized {
                    user: session.user.clone(),
                    cluster: name.clone(),
                });
            }
            name.clone()
        } else {
            let name = session.default_cluster.clone().unwrap_or_default();
            if !name.is_empty() {
                if let Err(e) = self.access.check_cluster_usage(&session.user, &name) {
                    warn!(
                        user = %session.user,
                        cluster = %name,
                        "default cluster usage check failed: {e:#}"
                    );
                    return Err(ClusterError::NotAuthorizedForDefault {
                        user: session.user.clone(),
                        cluster: name,
                    });
                }
                if self.registry.cluster_status(&name) == ClusterStatus::ManualShutdown {
                    warn!(cluster = %name, "cluster is in manual shutdown status");
                    return Err(ClusterError::ManuallyShutdown { cluster: name });
                }
            }
            name
        };

        self.resolve_backend_in_cluster(replica, &cluster).await
    }

    /// Resolves a backend for `replica` within the named cluster.
    pub async fn resolve_backend_in_cluster(
        &self,
        replica: &Replica,
        cluster: &str,
    ) -> Result<BackendId, ClusterError> {
        let mut cluster = cluster.to_string();

        // If the cluster is suspended, wait for it to come back up. The
        // registry may pick a different cluster (e.g. a default pool taking
        // over); adopt it. Wake-up failures are not fatal; resolution
        // proceeds with the originally requested cluster.
        match self.registry.wait_for_auto_start(&cluster).await {
            Ok(woken) => {
                if !woken.is_empty() && woken != cluster {
                    warn!(
                        requested = %cluster,
                        resolved = %woken,
                        "auto start chose a different cluster"
                    );
                    cluster = woken;
                }
            }
            Err(e) => warn!(cluster = %cluster, "cannot resume cluster: {e:#}"),
        }

        if cluster.is_empty() {
            return Err(ClusterError::NotSet);
        }
        if !self.registry.cluster_names().contains(&cluster) {
            warn!(cluster = %cluster, "cluster is not registered");
            return Err(ClusterError::NotExist { cluster });
        }
        let Some(cluster_id) = self.registry.cluster_id_by_name(&cluster) else {
            warn!(cluster = %cluster, "cluster has no id mapping");
            return Err(ClusterError::NotExist { cluster });
        };

        if self.colocate.is_colocated_table(replica.table_id) {
            return self.colocated_backend(replica, &cluster_id);
        }

        if self.config.enable_multi_replica_read {
            return self.multi_replica_backend(replica, &cluster_id);
        }

        // Single-replica default path: primary tier, then secondary tier,
        // then a fresh hash-based assignment.
        if let Some(backend) = self.cached_backend(replica, &cluster_id, AssignmentTier::Primary) {
            return Ok(backend);
        }
        if !self.config.enable_immediate_backend_assign {
            if let Some(backend) =
                self.cached_backend(replica, &cluster_id, AssignmentTier::Secondary)
            {
                return Ok(backend);
            }
        }

        if self.faults.is_enabled(CACHED_ASSIGNMENT_POINT) {
            info!(point = CACHED_ASSIGNMENT_POINT, "fault injection point enabled");
            return Err(ClusterError::AllBackendsAbnormal {
                cluster: self.cluster_name(&cluster_id),
            });
        }

        let picked = self.hash_replica_to_backend(replica, &cluster_id)?;
        let tier = if self.config.enable_immediate_backend_assign {
            AssignmentTier::Primary
        } else {
            AssignmentTier::Secondary
        };
        replica.assignments().set_backend(&cluster_id, tier, picked);
        Ok(picked)
    }

    /// Picks a backend for a replica of a colocated table.
    ///
    /// Replicas sharing an ordinal hash to the same position in the
    /// cluster's alive backends, sorted by id, so colocated tablets land
    /// together across tables.
    fn colocated_backend(
        &self,
        replica: &Replica,
        cluster_id: &ClusterId,
    ) -> Result<BackendId, ClusterError> {
        let mut backends = self.registry.backends_in_cluster(cluster_id);
        if backends.is_empty() {
            return Err(ClusterError::NoAliveBackend {
                cluster: self.cluster_name(cluster_id),
            });
        }
        backends.sort_by_key(|be| be.id);
        let available: Vec<_> = backends.into_iter().filter(|be| be.alive).collect();
        if available.is_empty() {
            warn!(cluster_id = %cluster_id, "failed to get an alive backend for colocated table");
            return Err(ClusterError::AllBackendsAbnormal {
                cluster: self.cluster_name(cluster_id),
            });
        }
        // Replicas in a colocation group always carry an ordinal.
        let ordinal = replica.ordinal.unwrap_or_default() as usize;
        Ok(available[ordinal % available.len()].id)
    }

    /// Multi-replica read path: serve from the sampled fan-out list or the
    /// primary, resampling when neither cached candidate is healthy.
    fn multi_replica_backend(
        &self,
        replica: &Replica,
        cluster_id: &ClusterId,
    ) -> Result<BackendId, ClusterError> {
        let replica_num = self.config.replica_num.max(1);
        let (slot, allow_cold_read) = {
            let mut rng = rand::rng();
            (
                rng.random_range(0..replica_num),
                rng.random_range(0..100u32) < self.config.cold_read_percent,
            )
        };

        let assignment = replica
            .assignments()
            .get(cluster_id)
            .unwrap_or_default();

        let mut candidate = None;
        if assignment.sampled.len() > slot {
            candidate = Some(assignment.sampled[slot]);
        } else if !allow_cold_read {
            candidate = assignment.primary;
        }
        if let Some(backend) = candidate {
            if self.is_query_available(backend) {
                debug!(%backend, "serving read from cached assignment");
                return Ok(backend);
            }
        }

        let sampled = self.hash_replica_to_backends(replica, cluster_id, replica_num)?;
        replica
            .assignments()
            .set_sampled(cluster_id, sampled.clone());
        if sampled.len() > slot {
            Ok(sampled[slot])
        } else {
            Ok(sampled[0])
        }
    }

    /// Returns the cached backend in the given tier if it is healthy.
    fn cached_backend(
        &self,
        replica: &Replica,
        cluster_id: &ClusterId,
        tier: AssignmentTier,
    ) -> Option<BackendId> {
        let assignment = replica.assignments().get(cluster_id)?;
        let backend = match tier {
            AssignmentTier::Primary => assignment.primary,
            AssignmentTier::Secondary => assignment.secondary,
        }?;
        if self.is_query_available(backend) {
            debug!(%backend, ?tier, "cached backend is healthy");
            Some(backend)
        } else {
            None
        }
    }

    fn is_query_available(&self, backend: BackendId) -> bool {
        self.registry
            .backend(backend)
            .is_some_and(|be| be.query_available)
    }

    /// Deterministically hashes the replica to one eligible backend.
    pub fn hash_replica_to_backend(
        &self,
        replica: &Replica,
        cluster_id: &ClusterId,
    ) -> Result<BackendId, ClusterError> {
        let available = self.eligible_backends(cluster_id)?;
        let index = hash_index_for(replica, 0, available.len());
        let picked = available[index].id;
        info!(
            %picked,
            replica = %replica.id,
            partition = %replica.partition_id,
            backends = available.len(),
            ordinal = ?replica.ordinal,
            index,
            "picked backend"
        );
        Ok(picked)
    }

    /// Hashes the replica to up to `replica_num` distinct eligible
    /// backends, removing each pick from the pool before the next draw.
    pub fn hash_replica_to_backends(
        &self,
        replica: &Replica,
        cluster_id: &ClusterId,
        replica_num: usize,
    ) -> Result<Vec<BackendId>, ClusterError> {
        let mut available = self.eligible_backends(cluster_id)?;
        let real_replica_num = replica_num.min(available.len());
        let mut picks = Vec::with_capacity(real_replica_num);
        for i in 0..real_replica_num {
            let index = hash_index_for(replica, u32::try_from(i).unwrap_or(u32::MAX), available.len());
            let picked = available.remove(index);
            info!(
                picked = %picked.id,
                replica = %replica.id,
                partition = %replica.partition_id,
                backends = available.len(),
                ordinal = ?replica.ordinal,
                index,
                "picked backend"
            );
            picks.push(picked.id);
        }
        Ok(picks)
    }

    /// The backends in the cluster eligible for fresh placements: alive, or
    /// heartbeat-stale by at most one heartbeat interval (a backend that
    /// crashed or restarted recently may not have reported yet), excluding
    /// smooth-upgrade sources. Sorted by id for stable indexing.
    fn eligible_backends(&self, cluster_id: &ClusterId) -> Result<Vec<Backend>, ClusterError> {
        let mut backends = self.registry.backends_in_cluster(cluster_id);
        if backends.is_empty() {
            return Err(ClusterError::NoAliveBackend {
                cluster: self.cluster_name(cluster_id),
            });
        }
        backends.sort_by_key(|be| be.id);

        let now_ms = now_ms();
        let heartbeat_ms = i64::try_from(self.config.heartbeat_interval.as_millis()).unwrap_or(i64::MAX);
        let available: Vec<_> = backends
            .into_iter()
            .filter(|be| {
                let miss_ms = (now_ms - be.last_heartbeat_ms).abs();
                (be.alive || miss_ms <= heartbeat_ms) && !be.smooth_upgrade_src
            })
            .collect();
        if available.is_empty() {
            warn!(cluster_id = %cluster_id, "failed to get an available backend");
            return Err(ClusterError::AllBackendsAbnormal {
                cluster: self.cluster_name(cluster_id),
            });
        }
        debug!(cluster_id = %cluster_id, available = available.len(), "eligible backends");
        Ok(available)
    }

    /// The human-facing name for error messages; falls back to the id.
    fn cluster_name(&self, cluster_id: &ClusterId) -> String {
        self.registry
            .cluster_name_by_id(cluster_id)
            .unwrap_or_else(|| cluster_id.to_string())
    }
}

/// The placement index for a replica among `len` eligible backends.
///
/// Replicas with an ordinal hash by `(partition id + offset)`, tying a
/// (partition, ordinal) pair to a stable backend modulo membership
/// changes. Legacy replicas without an ordinal fall back to hashing by
/// replica id, which is not collision-resistant across replicas of the
/// same tablet.
fn hash_index_for(replica: &Replica, offset: u32, len: usize) -> usize {
    match replica.ordinal {
        None => usize::try_from(replica.id.0 % len as u64).unwrap_or(0),
        Some(ordinal) => {
            let hash = hash128_low(replica.partition_id.0.wrapping_add(u64::from(offset)));
            let len = len as i64;
            // (hash + ordinal) % len may be negative, so take the modulus
            // of len again to guarantee a non-negative index.
            let index = (hash.wrapping_add(i64::from(ordinal)) % len + len) % len;
            usize::try_from(index).unwrap_or(0)
        }
    }
}

/// The low 64 bits of the 128-bit Murmur3 hash of `value`, as a signed
/// integer.
fn hash128_low(value: u64) -> i64 {
    let hash = murmur3::murmur3_x64_128(&mut Cursor::new(value.to_le_bytes()), 0).unwrap_or(0);
    hash as u64 as i64
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
