// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The transactional metadata-service client.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use tern_cluster_client::{DatabaseId, IndexId, PartitionId, TableId};

use crate::proto::{
    CreateTabletsRequest, DropStageRequest, IndexRequest, MetaCode, MetaService, MetaStatus,
    PartitionRequest, RpcError, StageType,
};
use crate::retry::ConflictRetry;
use crate::tablet_meta::TabletMetadataRecord;
use crate::MetaClientConfig;

/// Stage drops are interactive and fail fast rather than riding out the
/// full conflict-retry ceiling.
const DROP_STAGE_RETRY_TIMES: usize = 3;

/// An error returned by [`MetaTxnClient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaClientError {
    /// The metadata service responded with a terminal non-OK status.
    #[error("metadata service returned {code:?}: {msg}")]
    Service { code: MetaCode, msg: String },
    #[error(transparent)]
    Transport(#[from] RpcError),
    /// A stage drop targeted a stage that does not exist.
    #[error("stage not found: {0}")]
    StageNotFound(String),
}

/// Issues metadata-service transactions with conflict retries.
///
/// Every write here is an optimistic transaction on the service side: a
/// conflicting concurrent writer causes a [`MetaCode::KvTxnConflict`]
/// response, and the client re-sends with jittered backoff until the
/// write lands or the attempt ceiling is reached. All other non-OK codes
/// are terminal and surface as [`MetaClientError::Service`].
#[derive(Clone, Debug)]
pub struct MetaTxnClient {
    service: Arc<dyn MetaService>,
    config: MetaClientConfig,
}

impl MetaTxnClient {
    pub fn new(service: Arc<dyn MetaService>, config: MetaClientConfig) -> Self {
        MetaTxnClient { service, config }
    }

    /// Registers partitions with the recycler ahead of tablet creation.
    /// Prepared partitions that are never committed are reaped after
    /// `expiration` seconds.
    pub async fn prepare_partition(
        &self,
        db_id: Option<DatabaseId>,
        table_id: TableId,
        partition_ids: Vec<PartitionId>,
        index_ids: Vec<IndexId>,
        expiration: i64,
    ) -> Result<(), MetaClientError> {
        let req = self.partition_request(db_id, table_id, partition_ids, index_ids, expiration);
        let service = Arc::clone(&self.service);
        let resp = self
            .config
            .retry()
            .run(
                || {
                    let service = Arc::clone(&service);
                    let req = req.clone();
                    async move { service.prepare_partition(req).await }
                },
                |resp| resp.status.code == MetaCode::KvTxnConflict,
            )
            .await?;
        check(&resp.status, "prepare partition")
    }

    /// Makes prepared partitions permanent once their tablets exist.
    pub async fn commit_partition(
        &self,
        db_id: Option<DatabaseId>,
        table_id: TableId,
        partition_ids: Vec<PartitionId>,
        index_ids: Vec<IndexId>,
    ) -> Result<(), MetaClientError> {
        let req = self.partition_request(db_id, table_id, partition_ids, index_ids, 0);
        let service = Arc::clone(&self.service);
        let resp = self
            .config
            .retry()
            .run(
                || {
                    let service = Arc::clone(&service);
                    let req = req.clone();
                    async move { service.commit_partition(req).await }
                },
                |resp| resp.status.code == MetaCode::KvTxnConflict,
            )
            .await?;
        check(&resp.status, "commit partition")
    }

    /// Hands partitions to the recycler for deletion.
    pub async fn drop_partition(
        &self,
        db_id: Option<DatabaseId>,
        table_id: TableId,
        partition_ids: Vec<PartitionId>,
        index_ids: Vec<IndexId>,
        expiration: i64,
    ) -> Result<(), MetaClientError> {
        let req = self.partition_request(db_id, table_id, partition_ids, index_ids, expiration);
        let service = Arc::clone(&self.service);
        let resp = self
            .config
            .retry()
            .run(
                || {
                    let service = Arc::clone(&service);
                    let req = req.clone();
                    async move { service.drop_partition(req).await }
                },
                |resp| resp.status.code == MetaCode::KvTxnConflict,
            )
            .await?;
        check(&resp.status, "drop partition")
    }

    /// Registers materialized indexes with the recycler ahead of tablet
    /// creation.
    pub async fn prepare_index(
        &self,
        table_id: TableId,
        index_ids: Vec<IndexId>,
        expiration: i64,
    ) -> Result<(), MetaClientError> {
        let req = IndexRequest {
            cloud_unique_id: self.config.cloud_unique_id.clone(),
            db_id: None,
            table_id,
            index_ids,
            expiration,
            is_new_table: false,
        };
        let service = Arc::clone(&self.service);
        let resp = self
            .config
            .retry()
            .run(
                || {
                    let service = Arc::clone(&service);
                    let req = req.clone();
                    async move { service.prepare_index(req).await }
                },
                |resp| resp.status.code == MetaCode::KvTxnConflict,
            )
            .await?;
        check(&resp.status, "prepare index")
    }

    /// Makes prepared indexes permanent. `is_new_table` marks the commit
    /// that creates the table itself, letting the service initialize the
    /// table version.
    pub async fn commit_index(
        &self,
        db_id: Option<DatabaseId>,
        table_id: TableId,
        index_ids: Vec<IndexId>,
        is_new_table: bool,
    ) -> Result<(), MetaClientError> {
        let req = IndexRequest {
            cloud_unique_id: self.config.cloud_unique_id.clone(),
            db_id,
            table_id,
            index_ids,
            expiration: 0,
            is_new_table,
        };
        let service = Arc::clone(&self.service);
        let resp = self
            .config
            .retry()
            .run(
                || {
                    let service = Arc::clone(&service);
                    let req = req.clone();
                    async move { service.commit_index(req).await }
                },
                |resp| resp.status.code == MetaCode::KvTxnConflict,
            )
            .await?;
        check(&resp.status, "commit index")
    }

    /// Hands materialized indexes to the recycler for deletion.
    pub async fn drop_index(
        &self,
        db_id: Option<DatabaseId>,
        table_id: TableId,
        index_ids: Vec<IndexId>,
        expiration: i64,
    ) -> Result<(), MetaClientError> {
        let req = IndexRequest {
            cloud_unique_id: self.config.cloud_unique_id.clone(),
            db_id,
            table_id,
            index_ids,
            expiration,
            is_new_table: false,
        };
        let service = Arc::clone(&self.service);
        let resp = self
            .config
            .retry()
            .run(
                || {
                    let service = Arc::clone(&service);
                    let req = req.clone();
                    async move { service.drop_index(req).await }
                },
                |resp| resp.status.code == MetaCode::KvTxnConflict,
            )
            .await?;
        check(&resp.status, "drop index")
    }

    /// Persists a batch of tablet metadata records.
    pub async fn create_tablets(
        &self,
        tablet_metas: Vec<TabletMetadataRecord>,
    ) -> Result<(), MetaClientError> {
        let req = CreateTabletsRequest {
            cloud_unique_id: self.config.cloud_unique_id.clone(),
            tablet_metas,
        };
        let service = Arc::clone(&self.service);
        let resp = self
            .config
            .retry()
            .run(
                || {
                    let service = Arc::clone(&service);
                    let req = req.clone();
                    async move { service.create_tablets(req).await }
                },
                |resp| resp.status.code == MetaCode::KvTxnConflict,
            )
            .await?;
        check(&resp.status, "create tablets")
    }

    /// Drops an ingestion stage. With `if_exists`, dropping a stage that
    /// does not exist succeeds.
    pub async fn drop_stage(
        &self,
        stage_type: StageType,
        user_name: Option<String>,
        user_id: Option<String>,
        stage_name: Option<String>,
        reason: Option<String>,
        if_exists: bool,
    ) -> Result<(), MetaClientError> {
        let req = DropStageRequest {
            cloud_unique_id: self.config.cloud_unique_id.clone(),
            stage_type,
            user_name,
            user_id,
            stage_name: stage_name.clone(),
            reason,
        };
        let retry = ConflictRetry {
            max_attempts: DROP_STAGE_RETRY_TIMES,
            ..self.config.retry()
        };
        let service = Arc::clone(&self.service);
        let resp = retry
            .run(
                || {
                    let service = Arc::clone(&service);
                    let req = req.clone();
                    async move { service.drop_stage(req).await }
                },
                |resp| resp.status.code == MetaCode::KvTxnConflict,
            )
            .await?;
        if resp.status.code == MetaCode::StageNotFound {
            let stage = stage_name.unwrap_or_default();
            if if_exists {
                info!(%stage, "stage already dropped");
                return Ok(());
            }
            return Err(MetaClientError::StageNotFound(stage));
        }
        check(&resp.status, "drop stage")
    }

    fn partition_request(
        &self,
        db_id: Option<DatabaseId>,
        table_id: TableId,
        partition_ids: Vec<PartitionId>,
        index_ids: Vec<IndexId>,
        expiration: i64,
    ) -> PartitionRequest {
        PartitionRequest {
            cloud_unique_id: self.config.cloud_unique_id.clone(),
            db_id,
            table_id,
            partition_ids,
            index_ids,
            expiration,
        }
    }
}

fn check(status: &MetaStatus, op: &str) -> Result<(), MetaClientError> {
    if status.is_ok() {
        return Ok(());
    }
    warn!(code = ?status.code, msg = %status.msg, "{op} failed");
    Err(MetaClientError::Service {
        code: status.code,
        msg: status.msg.clone(),
    })
}
