/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The capabilities the client core consumes from the storage service.
//!
//! The core never talks to the service directly. It is handed a
//! [`Backend`], which bundles four capabilities:
//!
//! - [`Registry`]: name resolution and creation of containers and
//!   objects;
//! - [`DataMover`]: asynchronous bulk transfers, submitted and then
//!   polled for completion;
//! - [`TagStore`]: raw tag bytes per entity and key;
//! - [`PredicateEvaluator`]: evaluation of comparisons over an object's
//!   data.
//!
//! [`crate::sim::SimBackend`] implements all of them in-process.

use std::sync::Arc;

use async_trait::async_trait;
use bitvec::vec::BitVec;
use bytes::Bytes;
use ndregion::Region;
use serde::Deserialize;
use serde::Serialize;

use crate::container::Lifetime;
use crate::error::Result;
use crate::ids::ContainerId;
use crate::ids::EntityId;
use crate::ids::ObjectId;
use crate::ids::RequestToken;
use crate::object::ObjectProperties;
use crate::query::Predicate;

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerMeta {
    pub id: ContainerId,
    pub name: String,
    pub lifetime: Lifetime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub id: ObjectId,
    pub name: String,
    pub container: ContainerId,
    pub properties: ObjectProperties,
    pub lifetime: Lifetime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Read,
    Write,
}

/// One bulk transfer. `region` is absolute and lies within the
/// object's dimensions; for writes, `data` holds exactly the region's
/// bytes in row-major order. Reads carry an empty `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub object: ObjectId,
    pub region: Region,
    pub direction: Direction,
    pub data: Bytes,
}

/// The state of a submitted transfer, as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferPoll {
    Pending,
    /// The transfer finished. Reads carry the region's bytes.
    Done(std::result::Result<Option<Bytes>, String>),
}

#[cfg_attr(test, mockall::automock)]
pub trait Registry: Send + Sync {
    /// Create a container. Fails if the name is taken.
    fn create_container(&self, name: &str, lifetime: Lifetime) -> Result<ContainerMeta>;

    fn resolve_container(&self, name: &str) -> Result<ContainerMeta>;

    fn persist_container(&self, id: ContainerId) -> Result<()>;

    fn containers(&self) -> Result<Vec<ContainerMeta>>;

    /// Create an object in a container. Fails if the name is taken.
    fn create_object(
        &self,
        container: ContainerId,
        name: &str,
        properties: &ObjectProperties,
        lifetime: Lifetime,
    ) -> Result<ObjectMeta>;

    fn resolve_object(&self, name: &str) -> Result<ObjectMeta>;

    fn object_meta(&self, id: ObjectId) -> Result<ObjectMeta>;

    fn objects(&self, container: ContainerId) -> Result<Vec<ObjectMeta>>;
}

#[cfg_attr(test, mockall::automock)]
pub trait DataMover: Send + Sync {
    /// Register a transfer and return immediately.
    fn submit(&self, request: TransferRequest) -> Result<RequestToken>;

    /// Non-blocking completion check. Polling a finished transfer keeps
    /// returning its outcome until the token is released.
    fn poll(&self, token: RequestToken) -> TransferPoll;

    /// Forget a finished transfer.
    fn release(&self, token: RequestToken);
}

#[cfg_attr(test, mockall::automock)]
pub trait TagStore: Send + Sync {
    fn get_tag(&self, entity: EntityId, key: &str) -> Result<Option<Bytes>>;

    fn set_tag(&self, entity: EntityId, key: &str, value: Bytes) -> Result<()>;

    /// Delete a tag. The store decides which entities allow deletion,
    /// and fails with [`crate::Error::UnsupportedOperation`] otherwise.
    fn delete_tag(&self, entity: EntityId, key: &str) -> Result<()>;

    /// Objects whose tag `key` holds exactly `value`.
    fn find_objects(&self, key: &str, value: &[u8]) -> Result<Vec<ObjectId>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PredicateEvaluator: Send + Sync {
    /// Evaluate every predicate against the elements of `region` of one
    /// object, in one round trip. Returns one bitset per predicate, in
    /// order, each with one bit per element of the region in row-major
    /// order.
    async fn evaluate(
        &self,
        object: ObjectId,
        region: &Region,
        predicates: &[Predicate],
    ) -> Result<Vec<BitVec>>;
}

/// A storage service offering every capability.
pub trait Backend: Registry + DataMover + TagStore + PredicateEvaluator + 'static {}

impl<T> Backend for T where T: Registry + DataMover + TagStore + PredicateEvaluator + 'static {}

/// The capabilities of one backend, held separately so that each can
/// be replaced independently.
#[derive(Clone)]
pub(crate) struct Capabilities {
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) mover: Arc<dyn DataMover>,
    pub(crate) tags: Arc<dyn TagStore>,
    pub(crate) evaluator: Arc<dyn PredicateEvaluator>,
}

impl Capabilities {
    pub(crate) fn new<B: Backend>(backend: Arc<B>) -> Self {
        Self {
            registry: backend.clone(),
            mover: backend.clone(),
            tags: backend.clone(),
            evaluator: backend,
        }
    }
}
