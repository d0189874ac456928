/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io::Write;

use clap::Parser;
use pdc::tags::codec;

use crate::commands::Error;
use crate::commands::Runnable;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// An encoded tag value, e.g. `(1, 'two', 3.0, None)`.
    #[arg(index = 1)]
    pub text: String,
}

impl Runnable for Cmd {
    fn run(&self, out: &mut dyn Write) -> Result<(), Error> {
        let value = codec::decode(self.text.as_bytes())?;
        writeln!(out, "{:?}", value)?;
        writeln!(out, "{}", value)?;
        Ok(())
    }
}
