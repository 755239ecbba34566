// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The tablet-creating DDL flows: new partitions and new materialized
//! indexes.
//!
//! Creating a partition is a three-step transaction against the metadata
//! service: prepare the partition (registering it with the recycler so an
//! abandoned attempt is reaped), persist the tablet metadata of every
//! materialized index, then commit. A failure after prepare hands the
//! partition back to the recycler immediately rather than waiting for the
//! reap.

use std::collections::BTreeSet;
use std::sync::Arc;

use tern_cluster_client::{
    DatabaseId, IdAllocator, IndexId, PartitionId, Replica, ReplicaId, TableId, TabletId,
};
use tracing::{info, warn};

use crate::client::{MetaClientError, MetaTxnClient};
use crate::tablet_meta::{
    build_tablet_metadata, TabletIdentity, TabletMetadataRecord, TabletSchema,
};

/// One materialized index to create tablets for.
#[derive(Clone, Debug)]
pub struct IndexPlan {
    pub index_id: IndexId,
    pub schema: TabletSchema,
    /// Shadow indexes (schema change targets) create their tablets in the
    /// not-ready state.
    pub is_shadow: bool,
}

/// Everything needed to materialize one partition.
#[derive(Clone, Debug)]
pub struct PartitionDescriptor {
    pub db_id: Option<DatabaseId>,
    pub table_id: TableId,
    pub table_name: String,
    pub partition_id: PartitionId,
    pub indexes: Vec<IndexPlan>,
    /// Tablets per index; bucket `i` of every index shares ordinal `i`.
    pub bucket_num: u32,
    pub ttl_seconds: i64,
    pub in_memory: bool,
    /// Seconds the recycler waits before reaping an uncommitted prepare.
    pub expiration: i64,
}

/// One materialized index to add to existing partitions, for the
/// create-table and schema-change paths.
#[derive(Clone, Debug)]
pub struct IndexDescriptor {
    pub db_id: Option<DatabaseId>,
    pub table_id: TableId,
    pub table_name: String,
    pub index: IndexPlan,
    pub partition_ids: Vec<PartitionId>,
    pub bucket_num: u32,
    pub ttl_seconds: i64,
    pub in_memory: bool,
    pub expiration: i64,
    /// Set on the index commit that creates the table itself.
    pub is_new_table: bool,
}

/// The tablets and replicas materialized by a DDL flow.
#[derive(Debug, Default)]
pub struct CreatedTablets {
    pub tablet_ids: BTreeSet<TabletId>,
    pub replicas: Vec<Arc<Replica>>,
}

/// Creates all tablets of a partition and commits it.
///
/// Tablet and replica ids come from `ids`. Each tablet carries exactly one
/// replica whose ordinal is its bucket index, the position consistent
/// hashing routes by.
pub async fn create_partition_tablets(
    client: &MetaTxnClient,
    ids: &IdAllocator,
    desc: &PartitionDescriptor,
) -> Result<CreatedTablets, MetaClientError> {
    let index_ids: Vec<IndexId> = desc.indexes.iter().map(|index| index.index_id).collect();
    client
        .prepare_partition(
            desc.db_id,
            desc.table_id,
            vec![desc.partition_id],
            index_ids.clone(),
            desc.expiration,
        )
        .await?;

    let mut created = CreatedTablets::default();
    for index in &desc.indexes {
        let batch = TabletBatch {
            db_id: desc.db_id,
            table_id: desc.table_id,
            table_name: &desc.table_name,
            partition_id: desc.partition_id,
            index,
            bucket_num: desc.bucket_num,
            ttl_seconds: desc.ttl_seconds,
            in_memory: desc.in_memory,
        };
        let records = batch.materialize(ids, &mut created);
        if let Err(err) = client.create_tablets(records).await {
            abort_partition(client, desc, index_ids).await;
            return Err(err);
        }
    }

    if let Err(err) = client
        .commit_partition(
            desc.db_id,
            desc.table_id,
            vec![desc.partition_id],
            index_ids.clone(),
        )
        .await
    {
        abort_partition(client, desc, index_ids).await;
        return Err(err);
    }

    info!(
        partition_id = %desc.partition_id,
        table_id = %desc.table_id,
        tablets = created.tablet_ids.len(),
        "created partition tablets"
    );
    Ok(created)
}

/// Creates the tablets of one materialized index across existing
/// partitions, then commits the index.
///
/// This is the create-table and schema-change path; a shadow index
/// creates its tablets in the not-ready state and a background job
/// flips them once the data is converted.
pub async fn create_index_tablets(
    client: &MetaTxnClient,
    ids: &IdAllocator,
    desc: &IndexDescriptor,
) -> Result<CreatedTablets, MetaClientError> {
    let index_id = desc.index.index_id;
    client
        .prepare_index(desc.table_id, vec![index_id], desc.expiration)
        .await?;

    let mut created = CreatedTablets::default();
    for partition_id in &desc.partition_ids {
        let batch = TabletBatch {
            db_id: desc.db_id,
            table_id: desc.table_id,
            table_name: &desc.table_name,
            partition_id: *partition_id,
            index: &desc.index,
            bucket_num: desc.bucket_num,
            ttl_seconds: desc.ttl_seconds,
            in_memory: desc.in_memory,
        };
        let records = batch.materialize(ids, &mut created);
        if let Err(err) = client.create_tablets(records).await {
            abort_index(client, desc).await;
            return Err(err);
        }
    }

    if let Err(err) = client
        .commit_index(desc.db_id, desc.table_id, vec![index_id], desc.is_new_table)
        .await
    {
        abort_index(client, desc).await;
        return Err(err);
    }

    info!(
        index_id = %index_id,
        table_id = %desc.table_id,
        tablets = created.tablet_ids.len(),
        "created index tablets"
    );
    Ok(created)
}

/// One index's worth of tablets for one partition.
struct TabletBatch<'a> {
    db_id: Option<DatabaseId>,
    table_id: TableId,
    table_name: &'a str,
    partition_id: PartitionId,
    index: &'a IndexPlan,
    bucket_num: u32,
    ttl_seconds: i64,
    in_memory: bool,
}

impl TabletBatch<'_> {
    /// Allocates tablet and replica ids and builds the metadata records,
    /// recording everything created in `created`.
    fn materialize(
        &self,
        ids: &IdAllocator,
        created: &mut CreatedTablets,
    ) -> Vec<TabletMetadataRecord> {
        let mut records = Vec::with_capacity(self.bucket_num as usize);
        for bucket in 0..self.bucket_num {
            let tablet_id = TabletId(ids.allocate());
            let replica_id = ReplicaId(ids.allocate());
            let identity = TabletIdentity {
                table_id: self.table_id,
                index_id: self.index.index_id,
                partition_id: self.partition_id,
                tablet_id,
                replica_id,
                table_name: self.table_name,
                ttl_seconds: self.ttl_seconds,
                in_memory: self.in_memory,
                is_shadow: self.index.is_shadow,
            };
            records.push(build_tablet_metadata(&identity, &self.index.schema));
            created.tablet_ids.insert(tablet_id);
            created.replicas.push(Arc::new(Replica::new(
                replica_id,
                self.db_id.unwrap_or(DatabaseId(0)),
                self.table_id,
                self.partition_id,
                self.index.index_id,
                Some(bucket),
            )));
        }
        records
    }
}

/// Best-effort cleanup of a partition whose creation failed after
/// prepare. The recycler reaps it eventually even if this drop fails.
async fn abort_partition(
    client: &MetaTxnClient,
    desc: &PartitionDescriptor,
    index_ids: Vec<IndexId>,
) {
    if let Err(err) = client
        .drop_partition(
            desc.db_id,
            desc.table_id,
            vec![desc.partition_id],
            index_ids,
            desc.expiration,
        )
        .await
    {
        warn!(
            partition_id = %desc.partition_id,
            "failed to drop partition after aborted creation: {err}"
        );
    }
}

/// Best-effort cleanup of an index whose creation failed after prepare.
async fn abort_index(client: &MetaTxnClient, desc: &IndexDescriptor) {
    if let Err(err) = client
        .drop_index(
            desc.db_id,
            desc.table_id,
            vec![desc.index.index_id],
            desc.expiration,
        )
        .await
    {
        warn!(
            index_id = %desc.index.index_id,
            "failed to drop index after aborted creation: {err}"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::proto::{MetaCode, MetaStatus};
    use crate::tablet_meta::{ColumnSpec, CompressionKind, KeysType, SortType};
    use crate::testutil::MockMetaService;
    use crate::MetaClientConfig;

    fn schema() -> TabletSchema {
        TabletSchema {
            schema_version: 0,
            schema_hash: 42,
            keys_type: KeysType::Duplicate,
            short_key_column_count: 1,
            columns: vec![ColumnSpec {
                name: "k".into(),
                column_type: "BIGINT".into(),
                is_key: true,
                ..Default::default()
            }],
            indexes: vec![],
            sort_type: SortType::Lexical,
            sort_col_num: 1,
            compression: CompressionKind::Lz4f,
            bloom_filter_fpp: 0.05,
            store_row_column: false,
            enable_unique_key_merge_on_write: false,
        }
    }

    fn descriptor() -> PartitionDescriptor {
        PartitionDescriptor {
            db_id: Some(DatabaseId(1)),
            table_id: TableId(2),
            table_name: "t".into(),
            partition_id: PartitionId(3),
            indexes: vec![
                IndexPlan {
                    index_id: IndexId(10),
                    schema: schema(),
                    is_shadow: false,
                },
                IndexPlan {
                    index_id: IndexId(11),
                    schema: schema(),
                    is_shadow: false,
                },
            ],
            bucket_num: 4,
            ttl_seconds: 0,
            in_memory: false,
            expiration: 3600,
        }
    }

    fn client(service: Arc<MockMetaService>) -> MetaTxnClient {
        MetaTxnClient::new(
            service,
            MetaClientConfig {
                cloud_unique_id: "1:control:0".into(),
                rpc_retry_times: 3,
                retry_jitter_min: Duration::from_millis(1),
                retry_jitter_max: Duration::from_millis(2),
            },
        )
    }

    #[tokio::test]
    async fn creates_one_tablet_per_index_and_bucket() {
        let service = MockMetaService::scripted([]);
        let client = client(Arc::clone(&service));
        let ids = IdAllocator::new(100);

        let created = create_partition_tablets(&client, &ids, &descriptor())
            .await
            .unwrap();

        assert_eq!(created.tablet_ids.len(), 8);
        assert_eq!(created.replicas.len(), 8);
        for (i, replica) in created.replicas.iter().enumerate() {
            assert_eq!(replica.ordinal, Some(i as u32 % 4));
            assert_eq!(replica.partition_id, PartitionId(3));
        }

        // prepare, one create per index, commit.
        let partition_reqs = service.partition_requests.lock().unwrap();
        assert_eq!(partition_reqs.len(), 2);
        assert_eq!(partition_reqs[0].index_ids, vec![IndexId(10), IndexId(11)]);
        let create_reqs = service.create_tablets_requests.lock().unwrap();
        assert_eq!(create_reqs.len(), 2);
        assert_eq!(create_reqs[0].tablet_metas.len(), 4);
        assert_eq!(create_reqs[1].tablet_metas[0].index_id, IndexId(11));
    }

    #[tokio::test]
    async fn allocated_ids_are_distinct() {
        let service = MockMetaService::scripted([]);
        let client = client(service);
        let ids = IdAllocator::new(0);

        let created = create_partition_tablets(&client, &ids, &descriptor())
            .await
            .unwrap();

        let replica_ids: BTreeSet<_> = created.replicas.iter().map(|r| r.id).collect();
        assert_eq!(replica_ids.len(), 8);
        assert!(created
            .tablet_ids
            .iter()
            .all(|tablet| !replica_ids.contains(&ReplicaId(tablet.0))));
    }

    #[tokio::test]
    async fn index_tablets_span_all_partitions() {
        let service = MockMetaService::scripted([]);
        let client = client(Arc::clone(&service));
        let ids = IdAllocator::new(0);
        let desc = IndexDescriptor {
            db_id: Some(DatabaseId(1)),
            table_id: TableId(2),
            table_name: "t".into(),
            index: IndexPlan {
                index_id: IndexId(10),
                schema: schema(),
                is_shadow: true,
            },
            partition_ids: vec![PartitionId(3), PartitionId(4)],
            bucket_num: 2,
            ttl_seconds: 0,
            in_memory: false,
            expiration: 3600,
            is_new_table: true,
        };

        let created = create_index_tablets(&client, &ids, &desc).await.unwrap();
        assert_eq!(created.tablet_ids.len(), 4);

        let index_reqs = service.index_requests.lock().unwrap();
        assert_eq!(index_reqs.len(), 2);
        assert_eq!(index_reqs[0].expiration, 3600);
        assert!(index_reqs[1].is_new_table);
        let create_reqs = service.create_tablets_requests.lock().unwrap();
        assert_eq!(create_reqs.len(), 2);
        // Shadow indexes create their tablets not ready.
        assert_eq!(
            create_reqs[0].tablet_metas[0].tablet_state,
            crate::tablet_meta::TabletState::NotReady
        );
        assert_eq!(create_reqs[1].tablet_metas[0].partition_id, PartitionId(4));
    }

    #[tokio::test]
    async fn failed_index_creation_drops_the_prepared_index() {
        // prepare_index succeeds, create_tablets fails terminally.
        let service = MockMetaService::scripted([
            Ok(MetaStatus::ok()),
            Ok(MetaStatus::new(MetaCode::InvalidArgument, "bad schema")),
        ]);
        let client = client(Arc::clone(&service));
        let ids = IdAllocator::new(0);
        let desc = IndexDescriptor {
            db_id: None,
            table_id: TableId(2),
            table_name: "t".into(),
            index: IndexPlan {
                index_id: IndexId(10),
                schema: schema(),
                is_shadow: false,
            },
            partition_ids: vec![PartitionId(3)],
            bucket_num: 1,
            ttl_seconds: 0,
            in_memory: false,
            expiration: 3600,
            is_new_table: false,
        };

        let result = create_index_tablets(&client, &ids, &desc).await;
        assert!(matches!(result, Err(MetaClientError::Service { .. })));

        // prepare then the cleanup drop.
        let index_reqs = service.index_requests.lock().unwrap();
        assert_eq!(index_reqs.len(), 2);
    }

    #[tokio::test]
    async fn failed_creation_drops_the_prepared_partition() {
        // prepare succeeds, the first create_tablets fails terminally.
        let service = MockMetaService::scripted([
            Ok(MetaStatus::ok()),
            Ok(MetaStatus::new(MetaCode::InternalError, "tablet exists")),
        ]);
        let client = client(Arc::clone(&service));
        let ids = IdAllocator::new(0);

        let result = create_partition_tablets(&client, &ids, &descriptor()).await;
        assert!(matches!(result, Err(MetaClientError::Service { .. })));

        // prepare then the cleanup drop.
        let partition_reqs = service.partition_requests.lock().unwrap();
        assert_eq!(partition_reqs.len(), 2);
    }
}
