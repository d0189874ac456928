/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! An in-process storage service.
//!
//! [`SimBackend`] keeps every container, object, tag and transfer in
//! memory. Transfers run as tokio tasks, so submission returns
//! immediately and completion is observed by polling, just like against
//! a remote service. Tests can [`hold`](SimBackend::hold) all transfers
//! and evaluations to observe them pending, and inject transfer
//! failures per object.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use bitvec::vec::BitVec;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ndregion::Region;
use tokio::sync::watch;

use crate::backend::ContainerMeta;
use crate::backend::DataMover;
use crate::backend::Direction;
use crate::backend::ObjectMeta;
use crate::backend::PredicateEvaluator;
use crate::backend::Registry;
use crate::backend::TagStore;
use crate::backend::TransferPoll;
use crate::backend::TransferRequest;
use crate::container::Lifetime;
use crate::error::Error;
use crate::error::Result;
use crate::ids::ContainerId;
use crate::ids::EntityId;
use crate::ids::ObjectId;
use crate::ids::RequestToken;
use crate::object::ObjectProperties;
use crate::query::Predicate;

type Outcome = std::result::Result<Option<Bytes>, String>;

struct SimObject {
    meta: ObjectMeta,
    /// Row-major element bytes, zero-filled at creation.
    data: Arc<Mutex<Vec<u8>>>,
}

fn lock(data: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    data.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-memory backend implementing every capability.
pub struct SimBackend {
    next_container: AtomicU64,
    next_object: AtomicU64,
    next_token: AtomicU64,
    containers: DashMap<ContainerId, ContainerMeta>,
    container_names: DashMap<String, ContainerId>,
    objects: DashMap<ObjectId, SimObject>,
    object_names: DashMap<String, ObjectId>,
    tags: DashMap<(EntityId, String), Bytes>,
    /// `None` while a transfer is running.
    transfers: Arc<DashMap<RequestToken, Option<Outcome>>>,
    faults: DashMap<ObjectId, String>,
    /// `true` while transfers and evaluations are held back.
    held: watch::Sender<bool>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    pub fn new() -> Self {
        Self {
            next_container: AtomicU64::new(0),
            next_object: AtomicU64::new(0),
            next_token: AtomicU64::new(0),
            containers: DashMap::new(),
            container_names: DashMap::new(),
            objects: DashMap::new(),
            object_names: DashMap::new(),
            tags: DashMap::new(),
            transfers: Arc::new(DashMap::new()),
            faults: DashMap::new(),
            held: watch::Sender::new(false),
        }
    }

    /// Keep every transfer and evaluation, submitted before or after
    /// this call, pending until [`SimBackend::release_all`].
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    /// Let held transfers and evaluations run.
    pub fn release_all(&self) {
        self.held.send_replace(false);
    }

    /// Make every transfer subsequently submitted against object `name`
    /// fail with `reason`.
    pub fn fail_transfers(&self, name: &str, reason: impl Into<String>) -> Result<()> {
        let id = self.resolve_object(name)?.id;
        self.faults.insert(id, reason.into());
        Ok(())
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// The number of submitted transfers that have not been released.
    pub fn tracked_transfers(&self) -> usize {
        self.transfers.len()
    }

    fn object(&self, id: ObjectId) -> Result<dashmap::mapref::one::Ref<'_, ObjectId, SimObject>> {
        self.objects
            .get(&id)
            .ok_or_else(|| Error::not_found("object", id.to_string()))
    }

    fn entity_exists(&self, entity: EntityId) -> bool {
        match entity {
            EntityId::Container(id) => self.containers.contains_key(&id),
            EntityId::Object(id) => self.objects.contains_key(&id),
        }
    }

    fn unheld(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut held = self.held.subscribe();
        async move {
            // The backend is gone if this fails; nothing to wait for.
            let _ = held.wait_for(|held| !*held).await;
        }
    }
}

/// Apply `request` to an object's bytes. Both directions run under the
/// object's lock, so concurrent transfers never interleave.
fn apply(
    data: &Mutex<Vec<u8>>,
    dims: &[usize],
    size: usize,
    request: &TransferRequest,
) -> std::result::Result<Option<Bytes>, String> {
    let locations = request
        .region
        .locations(dims)
        .map_err(|err| err.to_string())?;
    let mut data = lock(data);
    match request.direction {
        Direction::Write => {
            for (chunk, offset) in request.data.chunks_exact(size).zip(locations) {
                data[offset * size..(offset + 1) * size].copy_from_slice(chunk);
            }
            Ok(None)
        }
        Direction::Read => {
            let mut out = Vec::with_capacity(request.region.num_elements().unwrap_or(0) * size);
            for offset in locations {
                out.extend_from_slice(&data[offset * size..(offset + 1) * size]);
            }
            Ok(Some(Bytes::from(out)))
        }
    }
}

impl Registry for SimBackend {
    fn create_container(&self, name: &str, lifetime: Lifetime) -> Result<ContainerMeta> {
        match self.container_names.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::validation(format!(
                "container `{}` already exists",
                name
            ))),
            Entry::Vacant(entry) => {
                let id = ContainerId(self.next_container.fetch_add(1, Ordering::SeqCst));
                let meta = ContainerMeta {
                    id,
                    name: name.to_string(),
                    lifetime,
                };
                self.containers.insert(id, meta.clone());
                entry.insert(id);
                Ok(meta)
            }
        }
    }

    fn resolve_container(&self, name: &str) -> Result<ContainerMeta> {
        let id = *self
            .container_names
            .get(name)
            .ok_or_else(|| Error::not_found("container", name))?;
        self.containers
            .get(&id)
            .map(|meta| meta.clone())
            .ok_or_else(|| Error::not_found("container", name))
    }

    fn persist_container(&self, id: ContainerId) -> Result<()> {
        let mut meta = self
            .containers
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("container", id.to_string()))?;
        meta.lifetime = Lifetime::Persistent;
        Ok(())
    }

    fn containers(&self) -> Result<Vec<ContainerMeta>> {
        let mut containers: Vec<_> = self.containers.iter().map(|e| e.value().clone()).collect();
        containers.sort_by_key(|meta| meta.id);
        Ok(containers)
    }

    fn create_object(
        &self,
        container: ContainerId,
        name: &str,
        properties: &ObjectProperties,
        lifetime: Lifetime,
    ) -> Result<ObjectMeta> {
        if !self.containers.contains_key(&container) {
            return Err(Error::not_found("container", container.to_string()));
        }
        match self.object_names.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::validation(format!(
                "object `{}` already exists",
                name
            ))),
            Entry::Vacant(entry) => {
                let id = ObjectId(self.next_object.fetch_add(1, Ordering::SeqCst));
                let meta = ObjectMeta {
                    id,
                    name: name.to_string(),
                    container,
                    properties: properties.clone(),
                    lifetime,
                };
                let data = vec![0u8; properties.size_in_bytes()];
                self.objects.insert(
                    id,
                    SimObject {
                        meta: meta.clone(),
                        data: Arc::new(Mutex::new(data)),
                    },
                );
                entry.insert(id);
                Ok(meta)
            }
        }
    }

    fn resolve_object(&self, name: &str) -> Result<ObjectMeta> {
        let id = *self
            .object_names
            .get(name)
            .ok_or_else(|| Error::not_found("object", name))?;
        self.object_meta(id)
    }

    fn object_meta(&self, id: ObjectId) -> Result<ObjectMeta> {
        Ok(self.object(id)?.meta.clone())
    }

    fn objects(&self, container: ContainerId) -> Result<Vec<ObjectMeta>> {
        if !self.containers.contains_key(&container) {
            return Err(Error::not_found("container", container.to_string()));
        }
        let mut objects: Vec<_> = self
            .objects
            .iter()
            .filter(|e| e.meta.container == container)
            .map(|e| e.meta.clone())
            .collect();
        objects.sort_by_key(|meta| meta.id);
        Ok(objects)
    }
}

impl DataMover for SimBackend {
    fn submit(&self, request: TransferRequest) -> Result<RequestToken> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| Error::Runtime(format!("transfers need a tokio runtime: {}", err)))?;
        let (data, dims, size) = {
            let object = self.object(request.object)?;
            (
                object.data.clone(),
                object.meta.properties.dims().to_vec(),
                object.meta.properties.data_type().size(),
            )
        };
        let fault = self.faults.get(&request.object).map(|reason| reason.clone());

        let token = RequestToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        self.transfers.insert(token, None);
        let transfers = self.transfers.clone();
        let unheld = self.unheld();
        runtime.spawn(async move {
            unheld.await;
            let outcome = match fault {
                Some(reason) => Err(reason),
                None => apply(&data, &dims, size, &request),
            };
            tracing::debug!(
                "sim {} {:?} {} finished: {}",
                token,
                request.direction,
                request.region,
                if outcome.is_ok() { "ok" } else { "failed" }
            );
            if let Some(mut slot) = transfers.get_mut(&token) {
                *slot = Some(outcome);
            }
        });
        Ok(token)
    }

    fn poll(&self, token: RequestToken) -> TransferPoll {
        match self.transfers.get(&token) {
            None => TransferPoll::Done(Err(format!("unknown {}", token))),
            Some(slot) => match &*slot {
                None => TransferPoll::Pending,
                Some(outcome) => TransferPoll::Done(outcome.clone()),
            },
        }
    }

    fn release(&self, token: RequestToken) {
        self.transfers.remove(&token);
    }
}

impl TagStore for SimBackend {
    fn get_tag(&self, entity: EntityId, key: &str) -> Result<Option<Bytes>> {
        if !self.entity_exists(entity) {
            return Err(Error::not_found("entity", entity.to_string()));
        }
        Ok(self
            .tags
            .get(&(entity, key.to_string()))
            .map(|value| value.clone()))
    }

    fn set_tag(&self, entity: EntityId, key: &str, value: Bytes) -> Result<()> {
        if !self.entity_exists(entity) {
            return Err(Error::not_found("entity", entity.to_string()));
        }
        self.tags.insert((entity, key.to_string()), value);
        Ok(())
    }

    /// Container tags can never be deleted, nor can the tags of
    /// persistent objects.
    fn delete_tag(&self, entity: EntityId, key: &str) -> Result<()> {
        match entity {
            EntityId::Container(_) => {
                return Err(Error::UnsupportedOperation(format!(
                    "cannot delete tag `{}` of {}: container tags cannot be deleted",
                    key, entity
                )));
            }
            EntityId::Object(id) => {
                if self.object(id)?.meta.lifetime == Lifetime::Persistent {
                    return Err(Error::UnsupportedOperation(format!(
                        "cannot delete tag `{}` of persistent {}",
                        key, entity
                    )));
                }
            }
        }
        self.tags
            .remove(&(entity, key.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::not_found("tag", format!("{}/{}", entity, key)))
    }

    fn find_objects(&self, key: &str, value: &[u8]) -> Result<Vec<ObjectId>> {
        let mut found: Vec<_> = self
            .tags
            .iter()
            .filter_map(|entry| match entry.key() {
                (EntityId::Object(id), k) if k == key && entry.value()[..] == *value => Some(*id),
                _ => None,
            })
            .collect();
        found.sort();
        Ok(found)
    }
}

#[async_trait]
impl PredicateEvaluator for SimBackend {
    async fn evaluate(
        &self,
        object: ObjectId,
        region: &Region,
        predicates: &[Predicate],
    ) -> Result<Vec<BitVec>> {
        self.unheld().await;
        let (data, dims, data_type) = {
            let object = self.object(object)?;
            (
                object.data.clone(),
                object.meta.properties.dims().to_vec(),
                object.meta.properties.data_type(),
            )
        };
        let len = region.num_elements()?;
        let size = data_type.size();
        let mut bitsets = vec![BitVec::repeat(false, len); predicates.len()];
        let data = lock(&data);
        for (ordinal, offset) in region.locations(&dims)?.enumerate() {
            let element = data_type.scalar(&data[offset * size..(offset + 1) * size])?;
            for (predicate, bits) in predicates.iter().zip(bitsets.iter_mut()) {
                bits.set(ordinal, predicate.matches(&element));
            }
        }
        Ok(bitsets)
    }
}

#[cfg(test)]
mod tests {
    use ndregion::region;

    use super::*;
    use crate::data::DataType;
    use crate::data::to_bytes;
    use crate::query::Operator;

    fn props(dims: &[usize], data_type: DataType) -> ObjectProperties {
        ObjectProperties::new(dims, data_type).unwrap()
    }

    async fn finish(sim: &SimBackend, token: RequestToken) -> Outcome {
        loop {
            match sim.poll(token) {
                TransferPoll::Pending => tokio::task::yield_now().await,
                TransferPoll::Done(outcome) => return outcome,
            }
        }
    }

    #[test]
    fn test_registry() {
        let sim = SimBackend::new();
        let b = sim.create_container("b", Lifetime::Persistent).unwrap();
        let a = sim.create_container("a", Lifetime::Transient).unwrap();
        assert!(matches!(
            sim.create_container("a", Lifetime::Transient),
            Err(Error::Validation(_))
        ));
        let names: Vec<_> = sim.containers().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["b", "a"]);

        sim.persist_container(a.id).unwrap();
        assert_eq!(sim.resolve_container("a").unwrap().lifetime, Lifetime::Persistent);

        let p = props(&[2], DataType::Int8);
        sim.create_object(b.id, "y", &p, Lifetime::Transient).unwrap();
        sim.create_object(a.id, "x", &p, Lifetime::Transient).unwrap();
        sim.create_object(b.id, "z", &p, Lifetime::Transient).unwrap();
        assert!(matches!(
            sim.create_object(a.id, "y", &p, Lifetime::Transient),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            sim.create_object(ContainerId(99), "w", &p, Lifetime::Transient),
            Err(Error::NotFound { kind: "container", .. })
        ));
        let names: Vec<_> = sim.objects(b.id).unwrap().into_iter().map(|o| o.name).collect();
        assert_eq!(names, vec!["y", "z"]);
        assert_eq!(sim.resolve_object("x").unwrap().container, a.id);
        assert!(matches!(
            sim.resolve_object("w"),
            Err(Error::NotFound { kind: "object", .. })
        ));
    }

    #[tokio::test]
    async fn test_transfers() {
        let sim = SimBackend::new();
        let c = sim.create_container("c", Lifetime::Transient).unwrap();
        let o = sim
            .create_object(c.id, "o", &props(&[3, 3], DataType::Int16), Lifetime::Transient)
            .unwrap();

        let write = sim
            .submit(TransferRequest {
                object: o.id,
                region: region![1..3, 0..2].unwrap(),
                direction: Direction::Write,
                data: to_bytes(&[1i16, 2, 3, 4]),
            })
            .unwrap();
        assert_eq!(finish(&sim, write).await, Ok(None));
        // Polling is repeatable until the token is released.
        assert_eq!(sim.poll(write), TransferPoll::Done(Ok(None)));
        sim.release(write);
        assert!(matches!(sim.poll(write), TransferPoll::Done(Err(_))));

        let read = sim
            .submit(TransferRequest {
                object: o.id,
                region: region![0..3, 0..3].unwrap(),
                direction: Direction::Read,
                data: Bytes::new(),
            })
            .unwrap();
        assert_eq!(
            finish(&sim, read).await,
            Ok(Some(to_bytes(&[0i16, 0, 0, 1, 2, 0, 3, 4, 0])))
        );
        sim.release(read);
        assert_eq!(sim.tracked_transfers(), 0);
    }

    #[tokio::test]
    async fn test_hold_and_faults() {
        let sim = SimBackend::new();
        let c = sim.create_container("c", Lifetime::Transient).unwrap();
        let o = sim
            .create_object(c.id, "o", &props(&[4], DataType::UInt8), Lifetime::Transient)
            .unwrap();
        let request = TransferRequest {
            object: o.id,
            region: region![0..4].unwrap(),
            direction: Direction::Read,
            data: Bytes::new(),
        };

        sim.hold();
        let token = sim.submit(request.clone()).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sim.poll(token), TransferPoll::Pending);
        sim.release_all();
        assert!(finish(&sim, token).await.is_ok());

        sim.fail_transfers("o", "injected").unwrap();
        let token = sim.submit(request.clone()).unwrap();
        assert_eq!(finish(&sim, token).await, Err("injected".to_string()));
        sim.clear_faults();
        let token = sim.submit(request).unwrap();
        assert!(finish(&sim, token).await.is_ok());
    }

    #[test]
    fn test_submit_needs_runtime() {
        let sim = SimBackend::new();
        assert!(matches!(
            sim.submit(TransferRequest {
                object: ObjectId(0),
                region: region![0..1].unwrap(),
                direction: Direction::Read,
                data: Bytes::new(),
            }),
            Err(Error::Runtime(_))
        ));
    }

    #[test]
    fn test_tag_policy() {
        let sim = SimBackend::new();
        let c = sim.create_container("c", Lifetime::Transient).unwrap();
        let p = props(&[1], DataType::Int8);
        let transient = sim.create_object(c.id, "t", &p, Lifetime::Transient).unwrap();
        let persistent = sim.create_object(c.id, "p", &p, Lifetime::Persistent).unwrap();

        let container = EntityId::Container(c.id);
        sim.set_tag(container, "k", Bytes::from_static(b"1")).unwrap();
        for _ in 0..3 {
            assert!(matches!(
                sim.delete_tag(container, "k"),
                Err(Error::UnsupportedOperation(_))
            ));
        }

        let entity = EntityId::Object(persistent.id);
        sim.set_tag(entity, "k", Bytes::from_static(b"1")).unwrap();
        assert!(matches!(
            sim.delete_tag(entity, "k"),
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(sim.get_tag(entity, "k").unwrap().is_some());

        let entity = EntityId::Object(transient.id);
        sim.set_tag(entity, "k", Bytes::from_static(b"1")).unwrap();
        sim.delete_tag(entity, "k").unwrap();
        assert!(matches!(
            sim.delete_tag(entity, "k"),
            Err(Error::NotFound { kind: "tag", .. })
        ));

        assert_eq!(
            sim.find_objects("k", b"1").unwrap(),
            vec![persistent.id]
        );
        assert!(matches!(
            sim.set_tag(EntityId::Object(ObjectId(42)), "k", Bytes::new()),
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_evaluate() {
        let sim = SimBackend::new();
        let c = sim.create_container("c", Lifetime::Transient).unwrap();
        let o = sim
            .create_object(c.id, "o", &props(&[2, 3], DataType::Float), Lifetime::Transient)
            .unwrap();
        let token = sim
            .submit(TransferRequest {
                object: o.id,
                region: region![0..2, 0..3].unwrap(),
                direction: Direction::Write,
                data: to_bytes(&[0.5f32, 1.5, 2.5, 3.5, f32::NAN, 5.5]),
            })
            .unwrap();
        finish(&sim, token).await.unwrap();

        let predicates = [
            Predicate {
                op: Operator::Gt,
                literal: 2.into(),
            },
            Predicate {
                op: Operator::Ne,
                literal: 3.5.into(),
            },
        ];
        let bitsets = sim
            .evaluate(o.id, &region![1..2, 0..3].unwrap(), &predicates)
            .await
            .unwrap();
        assert_eq!(bitsets.len(), 2);
        assert_eq!(bitsets[0].iter_ones().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(bitsets[1].iter_ones().collect::<Vec<_>>(), vec![1, 2]);
    }
}
