/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::backend::ContainerMeta;
use crate::error::Error;
use crate::error::Result;
use crate::ids::ContainerId;
use crate::ids::EntityId;
use crate::object::Object;
use crate::object::ObjectProperties;
use crate::session::SessionShared;
use crate::tags::Tags;

/// How long an entity outlives the session that created it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifetime {
    /// Kept by the service after the session ends. Persistent entities
    /// are immutable in places, for example their tags cannot be
    /// deleted.
    #[default]
    Persistent,
    /// Dropped by the service with the session.
    Transient,
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::Persistent => write!(f, "persistent"),
            Lifetime::Transient => write!(f, "transient"),
        }
    }
}

impl FromStr for Lifetime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "persistent" => Ok(Lifetime::Persistent),
            "transient" => Ok(Lifetime::Transient),
            _ => Err(Error::validation(format!(
                "unknown lifetime `{}`, expected `persistent` or `transient`",
                s
            ))),
        }
    }
}

/// A named group of objects.
#[derive(Clone)]
pub struct Container {
    meta: ContainerMeta,
    session: Arc<SessionShared>,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.meta.id)
            .field("name", &self.meta.name)
            .field("lifetime", &self.meta.lifetime)
            .finish()
    }
}

impl Container {
    pub(crate) fn new(meta: ContainerMeta, session: Arc<SessionShared>) -> Self {
        Self { meta, session }
    }

    pub fn id(&self) -> ContainerId {
        self.meta.id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn lifetime(&self) -> Lifetime {
        self.meta.lifetime
    }

    /// Make this container persistent. Persisting an already persistent
    /// container does nothing.
    pub fn persist(&mut self) -> Result<()> {
        self.session.ensure_open()?;
        if self.meta.lifetime == Lifetime::Persistent {
            return Ok(());
        }
        self.session.backend.registry.persist_container(self.meta.id)?;
        self.meta.lifetime = Lifetime::Persistent;
        tracing::debug!("persisted container `{}`", self.meta.name);
        Ok(())
    }

    /// Create an object in this container. The properties are copied:
    /// changing `properties` afterwards does not affect the object.
    pub fn create_object(
        &self,
        name: &str,
        properties: &ObjectProperties,
        lifetime: Lifetime,
    ) -> Result<Object> {
        self.session.ensure_open()?;
        if name.is_empty() {
            return Err(Error::validation("object name must not be empty"));
        }
        let meta =
            self.session
                .backend
                .registry
                .create_object(self.meta.id, name, properties, lifetime)?;
        tracing::debug!(
            "created {} object `{}` ({}) in container `{}`",
            lifetime,
            meta.name,
            meta.id,
            self.meta.name
        );
        Ok(self.session.object_handle(meta))
    }

    /// The objects created in this container.
    pub fn objects(&self) -> Result<Vec<Object>> {
        self.session.ensure_open()?;
        Ok(self
            .session
            .backend
            .registry
            .objects(self.meta.id)?
            .into_iter()
            .map(|meta| self.session.object_handle(meta))
            .collect())
    }

    pub fn tags(&self) -> Tags {
        Tags::new(
            EntityId::Container(self.meta.id),
            self.session.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataType;
    use crate::session::Session;

    #[test]
    fn test_lifetime_from_str() {
        assert_eq!("persistent".parse::<Lifetime>().unwrap(), Lifetime::Persistent);
        assert_eq!("TRANSIENT".parse::<Lifetime>().unwrap(), Lifetime::Transient);
        assert!(matches!(
            "forever".parse::<Lifetime>(),
            Err(Error::Validation(_))
        ));
        assert_eq!(Lifetime::default(), Lifetime::Persistent);
    }

    #[test]
    fn test_create_and_list() {
        let session = Session::simulated();
        let cont = session.create_container("cont").unwrap();
        assert_eq!(cont.lifetime(), Lifetime::Persistent);

        let props = ObjectProperties::new([4, 4], DataType::Int32).unwrap();
        cont.create_object("a", &props, Lifetime::Transient).unwrap();
        cont.create_object("b", &props, Lifetime::Persistent).unwrap();

        let names: Vec<String> = cont
            .objects()
            .unwrap()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(matches!(
            cont.create_object("a", &props, Lifetime::Transient),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            cont.create_object("", &props, Lifetime::Transient),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_persist() {
        let session = Session::simulated();
        let mut cont = session
            .create_container_with_lifetime("scratch", Lifetime::Transient)
            .unwrap();
        assert_eq!(cont.lifetime(), Lifetime::Transient);
        cont.persist().unwrap();
        assert_eq!(cont.lifetime(), Lifetime::Persistent);
        assert_eq!(
            session.container("scratch").unwrap().lifetime(),
            Lifetime::Persistent
        );
        cont.persist().unwrap();
    }

    #[test]
    fn test_tags() {
        let session = Session::simulated();
        let cont = session
            .create_container_with_lifetime("tagged", Lifetime::Transient)
            .unwrap();
        cont.tags().set("a", "b").unwrap();
        cont.tags()
            .set(
                "b",
                crate::TagValue::Tuple(vec![
                    true.into(),
                    false.into(),
                    (-44.88).into(),
                    crate::TagValue::tuple([crate::TagValue::None]),
                    "merp".into(),
                ]),
            )
            .unwrap();
        assert_eq!(cont.tags().get("a").unwrap(), "b".into());
        assert_eq!(
            cont.tags().get("b").unwrap().as_tuple().unwrap().len(),
            5
        );

        // Container tags cannot be deleted.
        assert!(matches!(
            cont.tags().delete("a"),
            Err(Error::UnsupportedOperation(_))
        ));
        assert_eq!(cont.tags().get("a").unwrap(), "b".into());
    }
}
