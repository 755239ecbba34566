// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A scripted in-process metadata service for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::proto::{
    CreateTabletsRequest, CreateTabletsResponse, DropStageRequest, DropStageResponse,
    IndexRequest, IndexResponse, MetaService, MetaStatus, PartitionRequest, PartitionResponse,
    RpcError,
};

/// Replays a script of statuses, one per call, across every operation.
/// Once the script is exhausted, every further call succeeds.
#[derive(Debug, Default)]
pub(crate) struct MockMetaService {
    script: Mutex<VecDeque<Result<MetaStatus, RpcError>>>,
    pub(crate) calls: AtomicUsize,
    pub(crate) partition_requests: Mutex<Vec<PartitionRequest>>,
    pub(crate) index_requests: Mutex<Vec<IndexRequest>>,
    pub(crate) create_tablets_requests: Mutex<Vec<CreateTabletsRequest>>,
    pub(crate) drop_stage_requests: Mutex<Vec<DropStageRequest>>,
}

impl MockMetaService {
    pub(crate) fn scripted(
        script: impl IntoIterator<Item = Result<MetaStatus, RpcError>>,
    ) -> Arc<Self> {
        Arc::new(MockMetaService {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<MetaStatus, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(MetaStatus::ok()))
    }
}

#[async_trait]
impl MetaService for MockMetaService {
    async fn prepare_partition(
        &self,
        req: PartitionRequest,
    ) -> Result<PartitionResponse, RpcError> {
        let status = self.next()?;
        self.partition_requests
            .lock()
            .expect("lock poisoned")
            .push(req);
        Ok(PartitionResponse { status })
    }

    async fn commit_partition(
        &self,
        req: PartitionRequest,
    ) -> Result<PartitionResponse, RpcError> {
        let status = self.next()?;
        self.partition_requests
            .lock()
            .expect("lock poisoned")
            .push(req);
        Ok(PartitionResponse { status })
    }

    async fn drop_partition(&self, req: PartitionRequest) -> Result<PartitionResponse, RpcError> {
        let status = self.next()?;
        self.partition_requests
            .lock()
            .expect("lock poisoned")
            .push(req);
        Ok(PartitionResponse { status })
    }

    async fn prepare_index(&self, req: IndexRequest) -> Result<IndexResponse, RpcError> {
        let status = self.next()?;
        self.index_requests.lock().expect("lock poisoned").push(req);
        Ok(IndexResponse { status })
    }

    async fn commit_index(&self, req: IndexRequest) -> Result<IndexResponse, RpcError> {
        let status = self.next()?;
        self.index_requests.lock().expect("lock poisoned").push(req);
        Ok(IndexResponse { status })
    }

    async fn drop_index(&self, req: IndexRequest) -> Result<IndexResponse, RpcError> {
        let status = self.next()?;
        self.index_requests.lock().expect("lock poisoned").push(req);
        Ok(IndexResponse { status })
    }

    async fn create_tablets(
        &self,
        req: CreateTabletsRequest,
    ) -> Result<CreateTabletsResponse, RpcError> {
        let status = self.next()?;
        self.create_tablets_requests
            .lock()
            .expect("lock poisoned")
            .push(req);
        Ok(CreateTabletsResponse { status })
    }

    async fn drop_stage(&self, req: DropStageRequest) -> Result<DropStageResponse, RpcError> {
        let status = self.next()?;
        self.drop_stage_requests
            .lock()
            .expect("lock poisoned")
            .push(req);
        Ok(DropStageResponse { status })
    }
}
