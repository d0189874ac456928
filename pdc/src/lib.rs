/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Client core for a distributed store of named, multidimensional
//! objects.
//!
//! A [`Session`] connects to a storage service, abstracted by
//! [`backend::Backend`]. Through it, callers create and resolve
//! [`Container`]s and [`Object`]s by name, then:
//!
//! - move data with asynchronous transfers of a [`Region`] of an object,
//!   returning a [`TransferHandle`] to wait on;
//! - build lazy [`Query`] trees over object data and evaluate them;
//! - attach typed [`TagValue`]s to containers and objects.
//!
//! ```
//! use pdc::DataType;
//! use pdc::Lifetime;
//! use pdc::ObjectProperties;
//! use pdc::Session;
//! use pdc::region;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> pdc::Result<()> {
//! let session = Session::simulated();
//! let cont = session.create_container("experiment")?;
//! let props = ObjectProperties::new([4, 4], DataType::Int32)?;
//! let obj = cont.create_object("temperature", &props, Lifetime::Transient)?;
//!
//! obj.set_values(Some(&region![1..3, 1..3]?), &[1i32, 2, 3, 4])?
//!     .wait()
//!     .await?;
//! let hits = obj.data().gt(2).evaluate(None)?.wait().await?;
//! assert_eq!(hits.nhits(), 2);
//!
//! session.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! Operations that outlive their call are tracked per object, and
//! neither an object nor the session can be closed while any of them
//! is outstanding: see [`Object::close`] and [`Session::close`].

pub mod backend;
pub mod config;
mod container;
pub mod data;
mod error;
pub mod ids;
mod metrics;
mod object;
pub mod query;
pub mod retry;
mod session;
pub mod sim;
pub mod tags;
mod transfer;

pub use container::Container;
pub use container::Lifetime;
pub use data::DataType;
pub use data::Element;
pub use error::Error;
pub use error::Result;
pub use ndregion::Range;
pub use ndregion::Region;
pub use ndregion::region;
pub use object::Object;
pub use object::ObjectProperties;
pub use query::Query;
pub use session::Session;
pub use tags::TagValue;
pub use tags::Tags;
pub use transfer::Status;
pub use transfer::TransferHandle;
pub use transfer::Transferred;
