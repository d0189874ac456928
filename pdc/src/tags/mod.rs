/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Key/value tags on containers and objects.
//!
//! Tag operations are synchronous: values are encoded with [`codec`]
//! and handed straight to the backend's tag store.

pub mod codec;

use std::sync::Arc;

use bytes::Bytes;
pub use codec::TagError;
pub use codec::TagValue;

use crate::error::Error;
use crate::error::Result;
use crate::ids::EntityId;
use crate::session::SessionShared;

/// The tags of one entity.
pub struct Tags {
    entity: EntityId,
    session: Arc<SessionShared>,
}

impl Tags {
    pub(crate) fn new(entity: EntityId, session: Arc<SessionShared>) -> Self {
        Self { entity, session }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// The value of tag `key`. Fails with [`Error::NotFound`] if the
    /// entity has no such tag.
    pub fn get(&self, key: &str) -> Result<TagValue> {
        self.try_get(key)?
            .ok_or_else(|| Error::not_found("tag", format!("{}/{}", self.entity, key)))
    }

    /// The value of tag `key`, if set.
    pub fn try_get(&self, key: &str) -> Result<Option<TagValue>> {
        self.session.ensure_open()?;
        match self.session.backend.tags.get_tag(self.entity, key)? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.try_get(key)?.is_some())
    }

    /// Set tag `key`, replacing any previous value.
    pub fn set(&self, key: &str, value: impl Into<TagValue>) -> Result<()> {
        self.session.ensure_open()?;
        if key.is_empty() {
            return Err(Error::validation("tag key must not be empty"));
        }
        let encoded = codec::encode(&value.into())?;
        self.session
            .backend
            .tags
            .set_tag(self.entity, key, Bytes::from(encoded))
    }

    /// Delete tag `key`. Whether deletion is allowed is up to the
    /// backend; persistent entities refuse it with
    /// [`Error::UnsupportedOperation`].
    pub fn delete(&self, key: &str) -> Result<()> {
        self.session.ensure_open()?;
        self.session.backend.tags.delete_tag(self.entity, key)
    }
}
