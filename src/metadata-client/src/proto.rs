// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The fields of the metadata-service protocol this client populates.
//!
//! The real wire encoding lives with the transport implementation; these
//! types only pin down the request/response shape the control plane
//! depends on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tern_cluster_client::{DatabaseId, IndexId, PartitionId, TableId};
use thiserror::Error;

use crate::tablet_meta::TabletMetadataRecord;

/// A transport-level failure talking to the metadata service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("metadata service rpc failed: {message}")]
pub struct RpcError {
    pub message: String,
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        RpcError {
            message: message.into(),
        }
    }
}

/// Status codes the metadata service responds with.
///
/// Only [`MetaCode::KvTxnConflict`] is retried; every other non-OK code
/// is terminal for the operation that received it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaCode {
    Ok,
    /// The optimistic-concurrency rejection signal.
    KvTxnConflict,
    StageNotFound,
    AlreadyExisted,
    InvalidArgument,
    InternalError,
}

/// The status block attached to every metadata-service response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetaStatus {
    pub code: MetaCode,
    pub msg: String,
}

impl MetaStatus {
    pub fn ok() -> Self {
        MetaStatus {
            code: MetaCode::Ok,
            msg: String::new(),
        }
    }

    pub fn new(code: MetaCode, msg: impl Into<String>) -> Self {
        MetaStatus {
            code,
            msg: msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == MetaCode::Ok
    }
}

/// Prepare/commit/drop request for a set of partitions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PartitionRequest {
    pub cloud_unique_id: String,
    pub db_id: Option<DatabaseId>,
    pub table_id: TableId,
    pub partition_ids: Vec<PartitionId>,
    pub index_ids: Vec<IndexId>,
    /// Seconds until the recycler may reap an uncommitted prepare;
    /// 0 selects the service-side default retention.
    pub expiration: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionResponse {
    pub status: MetaStatus,
}

/// Prepare/commit/drop request for a set of materialized indexes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndexRequest {
    pub cloud_unique_id: String,
    pub db_id: Option<DatabaseId>,
    pub table_id: TableId,
    pub index_ids: Vec<IndexId>,
    pub expiration: i64,
    pub is_new_table: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexResponse {
    pub status: MetaStatus,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateTabletsRequest {
    pub cloud_unique_id: String,
    pub tablet_metas: Vec<TabletMetadataRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateTabletsResponse {
    pub status: MetaStatus,
}

/// The flavor of stage being addressed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageType {
    #[default]
    Internal,
    External,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DropStageRequest {
    pub cloud_unique_id: String,
    pub stage_type: StageType,
    pub user_name: Option<String>,
    pub user_id: Option<String>,
    pub stage_name: Option<String>,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DropStageResponse {
    pub status: MetaStatus,
}

/// The metadata-service transport.
///
/// Implementations carry the RPC stack; [`MetaTxnClient`] layers request
/// construction and conflict retries on top. Calls block the task for a
/// network round trip; callers must not hold unrelated locks across them.
///
/// [`MetaTxnClient`]: crate::MetaTxnClient
#[async_trait]
pub trait MetaService: std::fmt::Debug + Send + Sync {
    async fn prepare_partition(&self, req: PartitionRequest)
        -> Result<PartitionResponse, RpcError>;

    async fn commit_partition(&self, req: PartitionRequest)
        -> Result<PartitionResponse, RpcError>;

    async fn drop_partition(&self, req: PartitionRequest) -> Result<PartitionResponse, RpcError>;

    async fn prepare_index(&self, req: IndexRequest) -> Result<IndexResponse, RpcError>;

    async fn commit_index(&self, req: IndexRequest) -> Result<IndexResponse, RpcError>;

    async fn drop_index(&self, req: IndexRequest) -> Result<IndexResponse, RpcError>;

    async fn create_tablets(
        &self,
        req: CreateTabletsRequest,
    ) -> Result<CreateTabletsResponse, RpcError>;

    async fn drop_stage(&self, req: DropStageRequest) -> Result<DropStageResponse, RpcError>;
}
