/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

mod demo;
mod region;
mod tag;

use std::io::Write;

use clap::Subcommand;
use enum_dispatch::enum_dispatch;

/// Error that `Runnable` throws.
type Error = anyhow::Error;

/// The run logic for each subcommand. Output goes to `out`.
#[enum_dispatch]
pub trait Runnable {
    fn run(&self, out: &mut dyn Write) -> Result<(), Error>;
}

/// Sub-commands of the CLI.
#[derive(Subcommand, Debug)]
#[enum_dispatch(Runnable)]
pub enum Command {
    /// Parses a region expression, optionally resolving it against a shape
    #[command()]
    Region(region::Cmd),
    /// Decodes a tag value and prints its canonical encoding
    #[command()]
    Tag(tag::Cmd),
    /// Runs concurrent writes and a query against a simulated backend
    #[command()]
    Demo(demo::Cmd),
}
