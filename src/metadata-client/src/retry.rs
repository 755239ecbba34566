// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Retry utilities for the metadata-service conflict protocol.

use std::future::Future;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::proto::RpcError;

/// Drives an operation against the metadata service under the conflict
/// protocol: retry only while the response reports a transaction
/// conflict, up to an attempt ceiling, sleeping a random jittered
/// duration between attempts to de-correlate concurrent writers.
///
/// Transport failures are also retried up to the ceiling, after which the
/// last transport error is surfaced. A response that still reports a
/// conflict at the ceiling is returned as-is; the caller surfaces its
/// status as a terminal failure.
#[derive(Clone, Debug, PartialEq)]
pub struct ConflictRetry {
    /// Total number of send attempts permitted.
    pub max_attempts: usize,
    /// Bounds for the uniform random sleep between attempts.
    pub min_jitter: Duration,
    pub max_jitter: Duration,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        ConflictRetry {
            max_attempts: 200,
            min_jitter: Duration::from_millis(20),
            max_jitter: Duration::from_millis(200),
        }
    }
}

impl ConflictRetry {
    /// Runs `op` until it yields a non-conflicting response, per
    /// `is_conflict`, or the attempt ceiling is reached.
    pub async fn run<T, F, Fut, P>(&self, mut op: F, is_conflict: P) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
        P: Fn(&T) -> bool,
    {
        let mut rng = SmallRng::from_os_rng();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(resp) if !is_conflict(&resp) => return Ok(resp),
                Ok(resp) => {
                    // Still conflicting at the ceiling: hand the response
                    // back so the caller can surface its status.
                    if attempt >= max_attempts {
                        return Ok(resp);
                    }
                    debug!(attempt, "metadata txn conflict, retrying");
                }
                Err(err) => {
                    if attempt >= max_attempts {
                        return Err(err);
                    }
                    warn!(attempt, "metadata service rpc failed: {err}");
                }
            }
            self.sleep(&mut rng).await;
        }
    }

    async fn sleep(&self, rng: &mut SmallRng) {
        let jitter = if self.max_jitter > self.min_jitter {
            rng.random_range(self.min_jitter..=self.max_jitter)
        } else {
            self.min_jitter
        };
        tokio::time::sleep(jitter).await;
    }
}
