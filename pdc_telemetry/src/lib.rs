/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Logging and metrics setup shared by the pdc crates.
//!
//! Logging goes through `tracing`; [`initialize_logging`] installs the
//! process-wide subscriber. Metrics go through `opentelemetry` global
//! meters, declared statically with [`declare_static_counter`].

/// Environment variable to disable the stderr logging layer.
/// Set to "1" to disable log output.
pub const DISABLE_FMT_TRACING: &str = "DISABLE_FMT_TRACING";

use std::io::IsTerminal;

pub use opentelemetry;
pub use opentelemetry::Key;
pub use opentelemetry::KeyValue;
pub use opentelemetry::Value;
pub use opentelemetry::global::meter;
pub use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt;

/// Create key value pairs for use in opentelemetry. Counters bumped with
/// different attribute values are tracked separately.
#[macro_export]
macro_rules! key_value {
    ($key:expr, $val:expr) => {
        $crate::opentelemetry::KeyValue::new(
            $crate::opentelemetry::Key::new($key),
            $crate::opentelemetry::Value::from($val),
        )
    };
}

/// Construct the key value attribute slice using mapping syntax.
/// Example:
/// ```
/// # #[macro_use] extern crate pdc_telemetry;
/// # fn main() {
/// assert_eq!(
///     kv_pairs!("object" => "obj", "elements" => 2),
///     &[key_value!("object", "obj"), key_value!("elements", 2)],
/// );
/// # }
/// ```
#[macro_export]
macro_rules! kv_pairs {
    ($($k:expr => $v:expr),* $(,)?) => {
        &[$($crate::key_value!($k, $v),)*]
    };
}

/// Create a thread safe static counter that can be incremented or
/// decremented. Counters with the same name are joined by the
/// underlying meter provider.
///
/// Example:
/// ```
/// # #[macro_use] extern crate pdc_telemetry;
/// # fn main() {
/// declare_static_counter!(REQUESTS_SUBMITTED, "requests_submitted");
///
/// REQUESTS_SUBMITTED.add(1, kv_pairs!("direction" => "write"));
/// # }
/// ```
#[macro_export]
macro_rules! declare_static_counter {
    ($name:ident, $key:expr) => {
        #[doc = "a global counter named: "]
        #[doc = $key]
        pub static $name: std::sync::LazyLock<
            $crate::opentelemetry::metrics::UpDownCounter<i64>,
        > = std::sync::LazyLock::new(|| {
            $crate::meter(module_path!())
                .i64_up_down_counter($key)
                .build()
        });
    };
}

/// Set up logging for this process. Log output goes to stderr, with
/// colors only when stderr is a terminal. The filter comes from
/// `RUST_LOG` when set, and otherwise defaults to `info` (or `debug`
/// in unit tests).
///
/// Calling this more than once is harmless: later calls leave the
/// first subscriber in place.
pub fn initialize_logging() {
    let default_level = match env::Env::current() {
        env::Env::Local => "info",
        env::Env::Test => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_filter(filter);

    use tracing_subscriber::Registry;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    if let Err(err) = Registry::default()
        .with(
            if std::env::var(DISABLE_FMT_TRACING).unwrap_or_default() != "1" {
                Some(fmt_layer)
            } else {
                None
            },
        )
        .try_init()
    {
        tracing::debug!("logging already initialized for this process: {}", err);
        return;
    }

    tracing::info!(
        target: "execution",
        execution_id = env::execution_id(),
        environment = %env::Env::current(),
        "logging_initialized"
    );
}

pub mod env {
    use std::sync::OnceLock;

    use rand::Rng;
    use rand::distributions::Alphanumeric;

    /// Env var used to forward the execution id to subprocesses.
    pub const PDC_EXECUTION_ID_ENV: &str = "PDC_EXECUTION_ID";

    /// The id of this execution: forwarded through `PDC_EXECUTION_ID`
    /// when the launcher provides one, and generated otherwise. The id
    /// is fixed for the lifetime of the process.
    pub fn execution_id() -> String {
        static ID: OnceLock<String> = OnceLock::new();
        ID.get_or_init(|| {
            std::env::var(PDC_EXECUTION_ID_ENV).unwrap_or_else(|_| {
                rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(24)
                    .map(char::from)
                    .collect::<String>()
            })
        })
        .clone()
    }

    #[derive(Debug, PartialEq)]
    pub enum Env {
        Local,
        Test,
    }

    impl std::fmt::Display for Env {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let name = match self {
                Self::Local => "local",
                Self::Test => "test",
            };
            f.write_str(name)
        }
    }

    impl Env {
        #[cfg(test)]
        pub fn current() -> Self {
            Self::Test
        }

        #[cfg(not(test))]
        pub fn current() -> Self {
            Self::Local
        }
    }
}
