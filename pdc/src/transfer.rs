/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Handles to in-flight transfers.
//!
//! A [`TransferHandle`] is returned by [`crate::Object::set_data`] and
//! [`crate::Object::get_data`] once the request has been submitted. It
//! moves from [`Status::Pending`] to exactly one of
//! [`Status::Succeeded`] or [`Status::Failed`], and never leaves that
//! state: every later `wait()` returns the same outcome without
//! touching the backend again.

use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;

use bytes::Bytes;
use ndregion::Region;
use pdc_telemetry::kv_pairs;

use crate::backend::Direction;
use crate::backend::TransferPoll;
use crate::data;
use crate::data::Element;
use crate::error::Error;
use crate::error::Result;
use crate::ids::RequestToken;
use crate::metrics::TRANSFERS_FAILED;
use crate::object::ObjectState;

/// The progress of an asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Succeeded,
    Failed,
}

impl Status {
    pub fn is_done(self) -> bool {
        self != Status::Pending
    }

    pub(crate) fn of<T>(outcome: &Result<T>) -> Self {
        match outcome {
            Ok(_) => Status::Succeeded,
            Err(_) => Status::Failed,
        }
    }
}

/// The outcome of a successful transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum Transferred {
    /// The bytes of the region that was read, in row-major order.
    Data(Bytes),
    /// A write was applied.
    Written,
}

impl Transferred {
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            Transferred::Data(bytes) => Some(bytes),
            Transferred::Written => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Transferred::Data(bytes) => Some(bytes),
            Transferred::Written => None,
        }
    }

    /// Decode the bytes of a read as values of type `T`.
    pub fn values<T: Element>(&self) -> Result<Vec<T>> {
        match self {
            Transferred::Data(bytes) => data::from_bytes(bytes),
            Transferred::Written => Err(Error::validation("a write transfer carries no data")),
        }
    }
}

/// A submitted read or write of one region of one object.
///
/// Dropping a handle does not cancel the transfer; the object keeps
/// counting it as outstanding until the backend reports it finished.
pub struct TransferHandle {
    object: Arc<ObjectState>,
    token: RequestToken,
    direction: Direction,
    region: Region,
    outcome: OnceLock<Result<Transferred>>,
}

impl fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferHandle")
            .field("object", &self.object.meta.name)
            .field("token", &self.token)
            .field("direction", &self.direction)
            .field("region", &self.region)
            .field("outcome", &self.outcome.get())
            .finish()
    }
}

impl TransferHandle {
    pub(crate) fn new(
        object: Arc<ObjectState>,
        token: RequestToken,
        direction: Direction,
        region: Region,
    ) -> Self {
        Self {
            object,
            token,
            direction,
            region,
            outcome: OnceLock::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The absolute region being transferred.
    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub fn object_name(&self) -> &str {
        &self.object.meta.name
    }

    /// Check for completion without blocking.
    pub fn status(&self) -> Status {
        if let Some(outcome) = self.outcome.get() {
            return Status::of(outcome);
        }
        match self.object.session.backend.mover.poll(self.token) {
            TransferPoll::Pending => Status::Pending,
            TransferPoll::Done(result) => Status::of(&self.complete(result)),
        }
    }

    /// Wait for the transfer to finish. Reads return the region's
    /// bytes, writes return [`Transferred::Written`]. A failed transfer
    /// returns [`Error::Transfer`].
    ///
    /// Only the calling task waits. Calling `wait` again, or from
    /// several tasks at once, returns the same outcome.
    pub async fn wait(&self) -> Result<Transferred> {
        let mover = &self.object.session.backend.mover;
        loop {
            if let Some(outcome) = self.outcome.get() {
                return outcome.clone();
            }
            match mover.poll(self.token) {
                TransferPoll::Pending => {
                    tokio::time::sleep(self.object.session.config.poll_interval).await
                }
                TransferPoll::Done(result) => return self.complete(result),
            }
        }
    }

    /// Same as [`TransferHandle::wait`].
    pub async fn wait_for_result(&self) -> Result<Transferred> {
        self.wait().await
    }

    fn complete(&self, result: std::result::Result<Option<Bytes>, String>) -> Result<Transferred> {
        let outcome = match result {
            Ok(Some(bytes)) => Ok(Transferred::Data(bytes)),
            Ok(None) => Ok(Transferred::Written),
            Err(reason) => Err(Error::Transfer {
                object: self.object.meta.name.clone(),
                reason,
            }),
        };
        if self.outcome.set(outcome.clone()).is_err() {
            // Another waiter got there first, and its outcome stands.
            return self.outcome.get().cloned().unwrap_or(outcome);
        }

        self.object.transfer_finished(self.token);
        match &outcome {
            Ok(_) => tracing::debug!("{} on object `{}` completed", self.token, self.object.meta.name),
            Err(err) => {
                TRANSFERS_FAILED.add(1, kv_pairs!("object" => self.object.meta.name.clone()));
                tracing::debug!("{} failed: {}", self.token, err);
            }
        }
        outcome
    }
}

impl Drop for TransferHandle {
    fn drop(&mut self) {
        if self.outcome.get().is_none() {
            self.object.transfer_abandoned(self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mockall::Sequence;
    use mockall::predicate::eq;
    use ndregion::region;
    use tracing_test::traced_test;

    use super::*;
    use crate::Lifetime;
    use crate::ObjectProperties;
    use crate::backend::Capabilities;
    use crate::backend::MockDataMover;
    use crate::data::DataType;
    use crate::session::Session;
    use crate::sim::SimBackend;

    fn session_with_mover(mover: MockDataMover) -> Session {
        let capabilities = Capabilities {
            mover: Arc::new(mover),
            ..Capabilities::new(Arc::new(SimBackend::new()))
        };
        Session::with_capabilities(capabilities, Default::default())
    }

    #[tokio::test]
    #[traced_test]
    async fn test_wait_is_idempotent() {
        let mut mover = MockDataMover::new();
        let mut seq = Sequence::new();
        mover
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(RequestToken(7)));
        mover
            .expect_poll()
            .with(eq(RequestToken(7)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| TransferPoll::Pending);
        mover
            .expect_poll()
            .with(eq(RequestToken(7)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| TransferPoll::Done(Ok(Some(Bytes::from_static(&[1, 2])))));
        mover
            .expect_release()
            .with(eq(RequestToken(7)))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let session = session_with_mover(mover);
        let cont = session.create_container("c").unwrap();
        let props = ObjectProperties::new([2], DataType::UInt8).unwrap();
        let obj = cont.create_object("o", &props, Lifetime::Transient).unwrap();

        let handle = obj.get_data(Some(&region![..].unwrap())).unwrap();
        assert_eq!(handle.region(), &region![0..2].unwrap());
        let first = handle.wait().await.unwrap();
        let second = handle.wait_for_result().await.unwrap();
        assert_eq!(first, Transferred::Data(Bytes::from_static(&[1, 2])));
        assert_eq!(first, second);
        assert_eq!(handle.status(), Status::Succeeded);
        assert_eq!(obj.outstanding(), 0);
        assert!(logs_contain("completed"));
    }

    #[tokio::test]
    async fn test_failure_is_sticky() {
        let mut mover = MockDataMover::new();
        mover.expect_submit().times(1).returning(|_| Ok(RequestToken(1)));
        mover
            .expect_poll()
            .times(1)
            .returning(|_| TransferPoll::Done(Err("disk on fire".to_string())));
        mover.expect_release().times(1).return_const(());

        let session = session_with_mover(mover);
        let cont = session.create_container("c").unwrap();
        let props = ObjectProperties::new([4], DataType::Int8).unwrap();
        let obj = cont.create_object("o", &props, Lifetime::Transient).unwrap();

        let handle = obj.set_data(None, vec![0u8; 4]).unwrap();
        let err = handle.wait().await.unwrap_err();
        assert_eq!(
            err,
            Error::Transfer {
                object: "o".to_string(),
                reason: "disk on fire".to_string()
            }
        );
        assert_eq!(handle.wait().await.unwrap_err(), err);
        assert_eq!(handle.status(), Status::Failed);
    }

    #[tokio::test]
    async fn test_submit_failure_is_not_tracked() {
        let mut mover = MockDataMover::new();
        mover
            .expect_submit()
            .times(1)
            .returning(|_| Err(Error::Runtime("no runtime".to_string())));

        let session = session_with_mover(mover);
        let cont = session.create_container("c").unwrap();
        let props = ObjectProperties::new([4], DataType::Int8).unwrap();
        let obj = cont.create_object("o", &props, Lifetime::Transient).unwrap();

        assert!(matches!(obj.get_data(None), Err(Error::Runtime(_))));
        assert_eq!(obj.outstanding(), 0);
        obj.close().unwrap();
    }

    #[test]
    fn test_transferred_values() {
        let read = Transferred::Data(data::to_bytes(&[1u16, 2, 3]));
        assert_eq!(read.values::<u16>().unwrap(), vec![1, 2, 3]);
        assert!(Transferred::Written.values::<u16>().is_err());
        assert!(Transferred::Written.bytes().is_none());
    }
}
