/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Sessions scope all client state to an explicit value: the backend,
//! the configuration, and the objects handed out so far.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use itertools::Itertools;

use crate::backend::Backend;
use crate::backend::Capabilities;
use crate::backend::ObjectMeta;
use crate::config::ClientConfig;
use crate::container::Container;
use crate::container::Lifetime;
use crate::error::Error;
use crate::error::Result;
use crate::ids::ObjectId;
use crate::object::Inflight;
use crate::object::Object;
use crate::object::ObjectState;
use crate::sim::SimBackend;
use crate::tags::TagValue;
use crate::tags::codec;

pub(crate) struct SessionShared {
    pub(crate) backend: Capabilities,
    pub(crate) config: ClientConfig,
    /// One shared state per object, so that every handle to an object
    /// sees the same in-flight operations.
    objects: DashMap<ObjectId, Weak<ObjectState>>,
    /// In-flight sets of objects whose handles are all gone but whose
    /// abandoned transfers have not finished.
    orphans: Mutex<Vec<Arc<Mutex<Inflight>>>>,
    closed: AtomicBool,
    /// Held for the duration of [`Session::close`].
    closing: Mutex<()>,
}

impl SessionShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed("session".to_string()));
        }
        Ok(())
    }

    /// The handle for an object, sharing state with any live handle
    /// to the same object.
    pub(crate) fn object_handle(self: &Arc<Self>, meta: ObjectMeta) -> Object {
        let mut entry = self.objects.entry(meta.id).or_default();
        if let Some(state) = entry.upgrade() {
            if !state.is_closed() {
                return Object::from_state(state);
            }
        }
        let state = Arc::new(ObjectState::new(meta, self.clone()));
        *entry = Arc::downgrade(&state);
        Object::from_state(state)
    }

    pub(crate) fn forget_object(&self, state: &Arc<ObjectState>) {
        self.objects.remove_if(&state.meta.id, |_, weak| {
            std::ptr::eq(weak.as_ptr(), Arc::as_ptr(state))
        });
        self.orphans()
            .retain(|orphan| !Arc::ptr_eq(orphan, &state.inflight));
    }

    /// Keep counting an object's transfers after its last handle is
    /// gone, until they finish.
    pub(crate) fn adopt_orphan(&self, inflight: &Arc<Mutex<Inflight>>) {
        let mut orphans = self.orphans();
        if !orphans.iter().any(|orphan| Arc::ptr_eq(orphan, inflight)) {
            orphans.push(inflight.clone());
        }
    }

    fn orphans(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Mutex<Inflight>>>> {
        self.orphans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outstanding(&self) -> usize {
        let mover = self.backend.mover.as_ref();
        let live = self
            .objects
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .map(|state| state.inflight.clone())
            .collect::<Vec<_>>();
        let orphans = self.orphans().clone();
        let total: usize = live
            .into_iter()
            .chain(orphans)
            .unique_by(|inflight| Arc::as_ptr(inflight))
            .map(|inflight| Inflight::lock(&inflight).prune(mover))
            .sum();
        self.orphans()
            .retain(|orphan| Inflight::lock(orphan).prune(mover) > 0);
        total
    }
}

/// A client session against one backend.
///
/// Sessions replace process-wide client initialization: everything
/// created through a session is scoped to it, and [`Session::close`]
/// tears it down, refusing while any transfer or query is outstanding.
/// Cloning a session yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    pub fn new<B: Backend>(backend: Arc<B>, config: ClientConfig) -> Self {
        Self::with_capabilities(Capabilities::new(backend), config)
    }

    /// A session over a fresh in-process [`SimBackend`], configured
    /// from the environment when possible.
    pub fn simulated() -> Self {
        let config = ClientConfig::from_env().unwrap_or_else(|err| {
            tracing::warn!("ignoring client configuration from the environment: {}", err);
            ClientConfig::default()
        });
        Self::new(Arc::new(SimBackend::new()), config)
    }

    pub(crate) fn with_capabilities(backend: Capabilities, config: ClientConfig) -> Self {
        tracing::info!(
            execution_id = %pdc_telemetry::env::execution_id(),
            "session started"
        );
        Self {
            shared: Arc::new(SessionShared {
                backend,
                config,
                objects: DashMap::new(),
                orphans: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                closing: Mutex::new(()),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Create a container with the configured default lifetime.
    pub fn create_container(&self, name: &str) -> Result<Container> {
        self.create_container_with_lifetime(name, self.shared.config.default_lifetime)
    }

    /// Create a container. Names must be non-empty and unique.
    pub fn create_container_with_lifetime(&self, name: &str, lifetime: Lifetime) -> Result<Container> {
        self.shared.ensure_open()?;
        if name.is_empty() {
            return Err(Error::validation("container name must not be empty"));
        }
        let meta = self.shared.backend.registry.create_container(name, lifetime)?;
        tracing::debug!("created {} container `{}` ({})", lifetime, meta.name, meta.id);
        Ok(Container::new(meta, self.shared.clone()))
    }

    /// Look up a container by name. Fails with [`Error::NotFound`] if
    /// it does not exist yet; this call never retries.
    pub fn container(&self, name: &str) -> Result<Container> {
        self.shared.ensure_open()?;
        let meta = self.shared.backend.registry.resolve_container(name)?;
        Ok(Container::new(meta, self.shared.clone()))
    }

    pub fn containers(&self) -> Result<Vec<Container>> {
        self.shared.ensure_open()?;
        Ok(self
            .shared
            .backend
            .registry
            .containers()?
            .into_iter()
            .map(|meta| Container::new(meta, self.shared.clone()))
            .collect())
    }

    /// Look up an object by name. Fails with [`Error::NotFound`] if it
    /// does not exist yet; see [`crate::retry`] for a retrying variant.
    pub fn object(&self, name: &str) -> Result<Object> {
        self.shared.ensure_open()?;
        let meta = self.shared.backend.registry.resolve_object(name)?;
        Ok(self.shared.object_handle(meta))
    }

    /// The objects whose tag `key` holds `value`.
    pub fn tag_query(&self, key: &str, value: impl Into<TagValue>) -> Result<Vec<Object>> {
        self.shared.ensure_open()?;
        let encoded = codec::encode(&value.into())?;
        let registry = &self.shared.backend.registry;
        self.shared
            .backend
            .tags
            .find_objects(key, &encoded)?
            .into_iter()
            .map(|id| Ok(self.shared.object_handle(registry.object_meta(id)?)))
            .collect()
    }

    /// The number of transfers and query evaluations, across every
    /// object of this session, that the backend has not finished.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding()
    }

    /// Tear down the session. Fails with [`Error::Lifetime`] while any
    /// operation is outstanding, leaving the session usable. Once
    /// closed, every operation through the session or anything created
    /// from it fails with [`Error::Closed`].
    ///
    /// Concurrent calls run one after another, so each reports the
    /// state it actually observed.
    pub fn close(&self) -> Result<()> {
        let _closing = self
            .shared
            .closing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shared.is_closed() {
            return Ok(());
        }
        self.shared.closed.store(true, Ordering::SeqCst);
        // New submissions now fail, so the count below can only shrink.
        let outstanding = self.shared.outstanding();
        if outstanding > 0 {
            self.shared.closed.store(false, Ordering::SeqCst);
            tracing::warn!(
                "refusing to close session with {} outstanding operation(s)",
                outstanding
            );
            return Err(Error::Lifetime {
                what: "session".to_string(),
                outstanding,
            });
        }
        self.shared.objects.clear();
        self.shared.orphans().clear();
        tracing::info!(
            execution_id = %pdc_telemetry::env::execution_id(),
            "session closed"
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}
