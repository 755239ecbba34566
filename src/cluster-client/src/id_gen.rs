// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! ID generation utilities.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

/// Manages the allocation of unique IDs.
#[derive(Debug, Default, Clone)]
pub struct Gen<Id: From<u64> + Default> {
    id: u64,
    phantom: PhantomData<Id>,
}

impl<Id: From<u64> + Default> Gen<Id> {
    /// Creates a generator whose first allocated id is `start`.
    pub fn starting_at(start: u64) -> Self {
        Gen {
            id: start,
            phantom: PhantomData,
        }
    }

    /// Allocates a new identifier of type `Id` and advances the generator.
    pub fn allocate_id(&mut self) -> Id {
        let id = self.id;
        self.id += 1;
        id.into()
    }
}

/// A generator of u64-bit IDs.
pub type IdGen = Gen<u64>;

/// A shareable [`IdGen`], for allocating tablet and replica ids from
/// concurrent DDL paths.
#[derive(Debug, Clone)]
pub struct IdAllocator(Arc<Mutex<IdGen>>);

impl IdAllocator {
    pub fn new(start: u64) -> Self {
        IdAllocator(Arc::new(Mutex::new(IdGen::starting_at(start))))
    }

    pub fn allocate(&self) -> u64 {
        self.0.lock().expect("lock poisoned").allocate_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_sequential_ids() {
        let ids = IdAllocator::new(10);
        assert_eq!(ids.allocate(), 10);
        assert_eq!(ids.allocate(), 11);
        let clone = ids.clone();
        assert_eq!(clone.allocate(), 12);
    }
}
