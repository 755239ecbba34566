// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use thiserror::Error;

/// A typed cluster-resolution failure.
///
/// These are propagated to the query/DDL caller, never swallowed at the
/// resolver boundary; the caller decides whether to retry the whole
/// operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The cluster has zero registered backends.
    #[error("there are no backend nodes in the current cluster {cluster}")]
    NoAliveBackend { cluster: String },
    /// The cluster has backends, but none is eligible for placement.
    #[error("all the backend nodes in the current cluster {cluster} are in an abnormal state")]
    AllBackendsAbnormal { cluster: String },
    /// No cluster could be resolved from the caller's context.
    #[error("cluster name is empty")]
    NotSet,
    /// The resolved cluster name is not registered in the system.
    #[error("the current cluster {cluster} is not registered in the system")]
    NotExist { cluster: String },
    #[error("the current cluster {cluster} has been manually shut down")]
    ManuallyShutdown { cluster: String },
    #[error("user {user} is not authorized to use cluster {cluster}")]
    NotAuthorized { user: String, cluster: String },
    #[error("user {user} is not authorized to use default cluster {cluster}")]
    NotAuthorizedForDefault { user: String, cluster: String },
    /// Resolution was attempted outside a connection session.
    #[error("connection context not set")]
    ConnectionContextNotSet,
}
