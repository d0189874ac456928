/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Client configuration.
//!
//! Values come from [`ClientConfig::default`], optionally overridden by
//! environment variables with [`ClientConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::container::Lifetime;
use crate::error::Error;
use crate::error::Result;

/// Milliseconds between completion polls of an outstanding transfer.
pub const PDC_POLL_INTERVAL_MS: &str = "PDC_POLL_INTERVAL_MS";
/// Number of attempts made by the caller-level resolution retry.
pub const PDC_RESOLVE_ATTEMPTS: &str = "PDC_RESOLVE_ATTEMPTS";
/// Milliseconds between resolution attempts.
pub const PDC_RESOLVE_INTERVAL_MS: &str = "PDC_RESOLVE_INTERVAL_MS";
/// Lifetime of containers created without an explicit one:
/// `persistent` or `transient`.
pub const PDC_DEFAULT_LIFETIME: &str = "PDC_DEFAULT_LIFETIME";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Spacing between completion polls while waiting on a handle.
    pub poll_interval: Duration,
    /// Attempts made by [`crate::retry`] helpers before giving up.
    pub resolve_attempts: usize,
    /// Spacing between attempts made by [`crate::retry`] helpers.
    pub resolve_interval: Duration,
    /// Lifetime given to containers created without an explicit one.
    pub default_lifetime: Lifetime,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            resolve_attempts: 5,
            resolve_interval: Duration::from_secs(1),
            default_lifetime: Lifetime::Persistent,
        }
    }
}

impl ClientConfig {
    /// The default configuration, with overrides from the `PDC_*`
    /// environment variables. A variable that is set but cannot be
    /// parsed is an error rather than being ignored.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = parse_var::<u64>(&lookup, PDC_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var::<usize>(&lookup, PDC_RESOLVE_ATTEMPTS)? {
            if attempts == 0 {
                return Err(Error::validation(format!(
                    "{} must be at least 1",
                    PDC_RESOLVE_ATTEMPTS
                )));
            }
            config.resolve_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, PDC_RESOLVE_INTERVAL_MS)? {
            config.resolve_interval = Duration::from_millis(ms);
        }
        if let Some(lifetime) = parse_var::<Lifetime>(&lookup, PDC_DEFAULT_LIFETIME)? {
            config.default_lifetime = lifetime;
        }
        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value.trim().parse::<T>().map(Some).map_err(|err| {
        Error::validation(format!("malformed {}=`{}`: {}", key, value, err))
    })
}
