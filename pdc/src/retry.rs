/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Caller-level resolution retries.
//!
//! The core never retries on its own: [`Session::object`] and
//! [`Session::container`] fail fast with [`Error::NotFound`] when a name
//! is not visible yet. Cooperating processes that create and resolve
//! the same names can use these helpers to wait for each other instead.
//! Attempts and spacing come from [`crate::config::ClientConfig`].

use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;

use crate::container::Container;
use crate::error::Error;
use crate::error::Result;
use crate::object::Object;
use crate::session::Session;

fn retryable(err: &Error) -> bool {
    matches!(err, Error::NotFound { .. })
}

fn strategy(session: &Session) -> impl Iterator<Item = std::time::Duration> {
    let config = session.config();
    FixedInterval::new(config.resolve_interval).take(config.resolve_attempts.saturating_sub(1))
}

/// Resolve object `name`, retrying while it is not found. Other errors
/// are returned immediately.
pub async fn resolve_object(session: &Session, name: &str) -> Result<Object> {
    let mut attempt = 0;
    RetryIf::spawn(
        strategy(session),
        || {
            attempt += 1;
            tracing::debug!("resolving object `{}`, attempt {}", name, attempt);
            std::future::ready(session.object(name))
        },
        retryable,
    )
    .await
}

/// Resolve container `name`, retrying while it is not found.
pub async fn resolve_container(session: &Session, name: &str) -> Result<Container> {
    RetryIf::spawn(
        strategy(session),
        || std::future::ready(session.container(name)),
        retryable,
    )
    .await
}
