// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Transactional client for the external metadata service.
//!
//! The metadata service owns the durable tablet/partition/index metadata
//! and enforces optimistic concurrency: a write that loses a race is
//! rejected with a transaction-conflict status and must be re-sent. This
//! crate builds the requests, drives the conflict-retry protocol
//! ([`ConflictRetry`]), assembles immutable tablet metadata records
//! ([`tablet_meta`]), and hosts the partition-creation DDL flow
//! ([`ddl`]).
//!
//! All operations are idempotent at the metadata-service side: re-sending
//! a prepare/commit/drop with the same ids is safe.

use std::time::Duration;

use serde::{Deserialize, Serialize};

mod client;
pub mod ddl;
mod proto;
mod retry;
pub mod tablet_meta;

#[cfg(test)]
pub(crate) mod testutil;

pub use client::{MetaClientError, MetaTxnClient};
pub use proto::{
    CreateTabletsRequest, CreateTabletsResponse, DropStageRequest, DropStageResponse,
    IndexRequest, IndexResponse, MetaCode, MetaService, MetaStatus, PartitionRequest,
    PartitionResponse, RpcError, StageType,
};
pub use retry::ConflictRetry;

/// Configures the metadata-service client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetaClientConfig {
    /// The cloud-unique identity of this control-plane instance, attached
    /// to every request.
    pub cloud_unique_id: String,
    /// Attempt ceiling for each metadata-service operation.
    pub rpc_retry_times: usize,
    /// Bounds of the random sleep between retries, de-correlating
    /// concurrent conflicting writers.
    pub retry_jitter_min: Duration,
    pub retry_jitter_max: Duration,
}

impl Default for MetaClientConfig {
    fn default() -> Self {
        MetaClientConfig {
            cloud_unique_id: String::new(),
            rpc_retry_times: 200,
            retry_jitter_min: Duration::from_millis(20),
            retry_jitter_max: Duration::from_millis(200),
        }
    }
}

impl MetaClientConfig {
    pub(crate) fn retry(&self) -> ConflictRetry {
        ConflictRetry {
            max_attempts: self.rpc_retry_times,
            min_jitter: self.retry_jitter_min,
            max_jitter: self.retry_jitter_max,
        }
    }
}
