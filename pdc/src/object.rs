/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Objects and their lifetime bookkeeping.
//!
//! Every asynchronous operation against an object (a transfer or a
//! query evaluation) is recorded in the object's in-flight set until
//! the backend reports it finished. All handles to the same object
//! within a session share one set, and [`Object::close`] refuses to
//! tear the object down while the set is non-empty.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use bytes::Bytes;
use ndregion::Region;
use pdc_telemetry::kv_pairs;

use crate::backend::DataMover;
use crate::backend::Direction;
use crate::backend::ObjectMeta;
use crate::backend::TransferPoll;
use crate::backend::TransferRequest;
use crate::container::Lifetime;
use crate::data;
use crate::data::DataType;
use crate::data::Element;
use crate::error::Error;
use crate::error::Result;
use crate::ids::ContainerId;
use crate::ids::EntityId;
use crate::ids::ObjectId;
use crate::ids::RequestToken;
use crate::metrics::TRANSFERS_SUBMITTED;
use crate::query::ObjectData;
use crate::session::SessionShared;
use crate::tags::Tags;
use crate::transfer::TransferHandle;

/// Creation-time properties of an object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectProperties {
    dims: Vec<usize>,
    data_type: DataType,
    time_step: u32,
    user_id: u32,
    app_name: String,
}

impl ObjectProperties {
    /// Properties for an object of the given dimensions and element
    /// type. Every dimension must be positive.
    pub fn new(dims: impl Into<Vec<usize>>, data_type: DataType) -> Result<Self> {
        let dims = dims.into();
        check_dims(&dims)?;
        Ok(Self {
            dims,
            data_type,
            time_step: 0,
            user_id: 0,
            app_name: String::new(),
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn set_dims(&mut self, dims: impl Into<Vec<usize>>) -> Result<()> {
        let dims = dims.into();
        check_dims(&dims)?;
        self.dims = dims;
        Ok(())
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn set_data_type(&mut self, data_type: DataType) {
        self.data_type = data_type;
    }

    pub fn time_step(&self) -> u32 {
        self.time_step
    }

    /// Fails with [`Error::Overflow`] unless `time_step` fits in a u32.
    pub fn set_time_step(&mut self, time_step: i64) -> Result<()> {
        self.time_step = to_u32("time_step", time_step)?;
        Ok(())
    }

    pub fn user_id(&self) -> u32 {
        self.user_id
    }

    /// Fails with [`Error::Overflow`] unless `user_id` fits in a u32.
    pub fn set_user_id(&mut self, user_id: i64) -> Result<()> {
        self.user_id = to_u32("user_id", user_id)?;
        Ok(())
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn set_app_name(&mut self, app_name: impl Into<String>) {
        self.app_name = app_name.into();
    }

    pub fn with_time_step(mut self, time_step: i64) -> Result<Self> {
        self.set_time_step(time_step)?;
        Ok(self)
    }

    pub fn with_user_id(mut self, user_id: i64) -> Result<Self> {
        self.set_user_id(user_id)?;
        Ok(self)
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.set_app_name(app_name);
        self
    }

    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.num_elements() * self.data_type.size()
    }
}

fn check_dims(dims: &[usize]) -> Result<()> {
    if dims.is_empty() {
        return Err(Error::validation("an object needs at least one dimension"));
    }
    if dims.contains(&0) {
        return Err(Error::validation(format!(
            "dimensions must be positive, got {:?}",
            dims
        )));
    }
    Ok(())
}

fn to_u32(field: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::Overflow(format!("{} {} does not fit in 32 bits", field, value)))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Tracking {
    /// A live handle will collect the outcome.
    Held,
    /// The handle was dropped; the token is released once finished.
    Abandoned,
}

/// The operations in flight against one object. Shared between the
/// object's state and, once every handle is gone, the session's orphan
/// list, which keeps counting abandoned transfers.
#[derive(Debug, Default)]
pub(crate) struct Inflight {
    transfers: HashMap<RequestToken, Tracking>,
    queries: usize,
    closed: bool,
}

impl Inflight {
    pub(crate) fn lock(inflight: &Mutex<Inflight>) -> MutexGuard<'_, Inflight> {
        inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget transfers the backend reports finished, releasing the
    /// abandoned ones, and return what is still outstanding.
    pub(crate) fn prune(&mut self, mover: &dyn DataMover) -> usize {
        self.transfers
            .retain(|token, tracking| match mover.poll(*token) {
                TransferPoll::Pending => true,
                TransferPoll::Done(_) => {
                    if *tracking == Tracking::Abandoned {
                        mover.release(*token);
                    }
                    false
                }
            });
        self.transfers.len() + self.queries
    }
}

/// State shared by every handle to one object.
pub(crate) struct ObjectState {
    pub(crate) meta: ObjectMeta,
    pub(crate) session: Arc<SessionShared>,
    pub(crate) inflight: Arc<Mutex<Inflight>>,
}

impl ObjectState {
    pub(crate) fn new(meta: ObjectMeta, session: Arc<SessionShared>) -> Self {
        Self {
            meta,
            session,
            inflight: Arc::default(),
        }
    }

    fn inflight(&self) -> MutexGuard<'_, Inflight> {
        Inflight::lock(&self.inflight)
    }

    pub(crate) fn describe(&self) -> String {
        format!("object `{}`", self.meta.name)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inflight().closed
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        self.session.ensure_open()?;
        if self.is_closed() {
            return Err(Error::Closed(self.describe()));
        }
        Ok(())
    }

    /// Submit a transfer and record it as in flight. The record is
    /// made under the same lock that guards teardown, so a transfer
    /// can never be submitted against a closed object.
    fn submit(&self, request: TransferRequest) -> Result<RequestToken> {
        let mut inflight = self.inflight();
        self.session.ensure_open()?;
        if inflight.closed {
            return Err(Error::Closed(self.describe()));
        }
        let token = self.session.backend.mover.submit(request)?;
        inflight.transfers.insert(token, Tracking::Held);
        Ok(token)
    }

    /// Called by the handle that collected a transfer's outcome.
    pub(crate) fn transfer_finished(&self, token: RequestToken) {
        self.inflight().transfers.remove(&token);
        self.session.backend.mover.release(token);
    }

    /// Called when a handle is dropped before collecting its outcome.
    /// The transfer still counts as outstanding until the backend
    /// reports it finished, even if no handle to the object remains.
    pub(crate) fn transfer_abandoned(&self, token: RequestToken) {
        let tracked = self
            .inflight()
            .transfers
            .get_mut(&token)
            .map(|tracking| *tracking = Tracking::Abandoned)
            .is_some();
        if tracked {
            self.session.adopt_orphan(&self.inflight);
        } else {
            self.session.backend.mover.release(token);
        }
    }

    /// The number of transfers and query evaluations the backend has
    /// not yet finished.
    pub(crate) fn outstanding(&self) -> usize {
        self.inflight().prune(self.session.backend.mover.as_ref())
    }

    fn close(&self) -> Result<()> {
        let mut inflight = self.inflight();
        if inflight.closed {
            return Ok(());
        }
        let outstanding = inflight.prune(self.session.backend.mover.as_ref());
        if outstanding > 0 {
            tracing::warn!(
                "refusing to close {} with {} outstanding operation(s)",
                self.describe(),
                outstanding
            );
            return Err(Error::Lifetime {
                what: self.describe(),
                outstanding,
            });
        }
        inflight.closed = true;
        Ok(())
    }

    pub(crate) fn lease_query(self: &Arc<Self>) -> Result<QueryLease> {
        let mut inflight = self.inflight();
        self.session.ensure_open()?;
        if inflight.closed {
            return Err(Error::Closed(self.describe()));
        }
        inflight.queries += 1;
        Ok(QueryLease {
            state: self.clone(),
        })
    }
}

/// Marks a query evaluation as outstanding on one object for as long
/// as it is alive.
pub(crate) struct QueryLease {
    state: Arc<ObjectState>,
}

impl Drop for QueryLease {
    fn drop(&mut self) {
        let mut inflight = self.state.inflight();
        inflight.queries = inflight.queries.saturating_sub(1);
    }
}

/// A handle to a named multidimensional object.
///
/// Handles are cheap to clone, and every handle to the same object
/// obtained from one session shares the object's in-flight bookkeeping.
#[derive(Clone)]
pub struct Object {
    state: Arc<ObjectState>,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.state.meta.id)
            .field("name", &self.state.meta.name)
            .finish()
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.state.meta.id == other.state.meta.id
    }
}

impl Eq for Object {}

impl Object {
    pub(crate) fn from_state(state: Arc<ObjectState>) -> Self {
        Self { state }
    }

    pub(crate) fn state(&self) -> &Arc<ObjectState> {
        &self.state
    }

    pub fn id(&self) -> ObjectId {
        self.state.meta.id
    }

    pub fn name(&self) -> &str {
        &self.state.meta.name
    }

    pub fn container_id(&self) -> ContainerId {
        self.state.meta.container
    }

    pub fn lifetime(&self) -> Lifetime {
        self.state.meta.lifetime
    }

    /// The properties the object was created with.
    pub fn properties(&self) -> &ObjectProperties {
        &self.state.meta.properties
    }

    pub fn dims(&self) -> &[usize] {
        self.state.meta.properties.dims()
    }

    pub fn data_type(&self) -> DataType {
        self.state.meta.properties.data_type()
    }

    /// Resolve `region` against this object's dimensions and check its
    /// bounds. `None` selects the whole object.
    pub fn absolute_region(&self, region: Option<&Region>) -> Result<Region> {
        let dims = self.dims();
        let region = match region {
            Some(region) => region.resolve(dims)?,
            None => Region::full(dims)?,
        };
        region.check_bounds(dims)?;
        Ok(region)
    }

    /// Start writing `data` into `region` (the whole object when
    /// `None`). `data` must hold exactly the region's elements, in
    /// row-major order. The write proceeds in the background; wait on
    /// the returned handle to learn its outcome.
    pub fn set_data(&self, region: Option<&Region>, data: impl Into<Bytes>) -> Result<TransferHandle> {
        self.state.ensure_open()?;
        let data = data.into();
        let region = self.absolute_region(region)?;
        let expected = region.num_elements()? * self.data_type().size();
        if data.len() != expected {
            return Err(Error::validation(format!(
                "{} of {} needs {} bytes of {} data, got {}",
                region,
                self.state.describe(),
                expected,
                self.data_type(),
                data.len()
            )));
        }
        self.submit(region, Direction::Write, data)
    }

    /// Like [`Object::set_data`], packing typed values. `T` must match
    /// the object's element type.
    pub fn set_values<T: Element>(&self, region: Option<&Region>, values: &[T]) -> Result<TransferHandle> {
        if T::DATA_TYPE != self.data_type() {
            return Err(Error::validation(format!(
                "cannot write {} values into {} of {}",
                T::DATA_TYPE,
                self.state.describe(),
                self.data_type()
            )));
        }
        self.set_data(region, data::to_bytes(values))
    }

    /// Start reading `region` (the whole object when `None`).
    pub fn get_data(&self, region: Option<&Region>) -> Result<TransferHandle> {
        self.state.ensure_open()?;
        let region = self.absolute_region(region)?;
        self.submit(region, Direction::Read, Bytes::new())
    }

    fn submit(&self, region: Region, direction: Direction, data: Bytes) -> Result<TransferHandle> {
        let request = TransferRequest {
            object: self.id(),
            region: region.clone(),
            direction,
            data,
        };
        let token = self.state.submit(request)?;
        let direction_name = match direction {
            Direction::Read => "read",
            Direction::Write => "write",
        };
        TRANSFERS_SUBMITTED.add(1, kv_pairs!("direction" => direction_name));
        tracing::debug!(
            "submitted {} {} of {} as {}",
            direction_name,
            region,
            self.state.describe(),
            token
        );
        Ok(TransferHandle::new(self.state.clone(), token, direction, region))
    }

    /// A comparison builder over this object's data.
    pub fn data(&self) -> ObjectData {
        ObjectData::new(self.clone())
    }

    pub fn tags(&self) -> Tags {
        Tags::new(EntityId::Object(self.id()), self.state.session.clone())
    }

    /// The number of transfers and query evaluations against this
    /// object that the backend has not finished yet, including ones
    /// whose handles were dropped.
    pub fn outstanding(&self) -> usize {
        self.state.outstanding()
    }

    /// Tear down this object. Fails with [`Error::Lifetime`] while any
    /// operation against it is outstanding; the object stays usable in
    /// that case. Once closed, every handle to the object fails with
    /// [`Error::Closed`], and the session hands out fresh handles.
    pub fn close(&self) -> Result<()> {
        self.state.close()?;
        self.state.session.forget_object(&self.state);
        tracing::debug!("closed {}", self.state.describe());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}
