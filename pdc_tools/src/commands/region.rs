/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io::Write;

use clap::Parser;
use ndregion::Region;

use crate::commands::Error;
use crate::commands::Runnable;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// Comma separated per-dimension slices, e.g. `2:4, :1`.
    #[arg(index = 1)]
    pub expr: String,

    /// Object shape to resolve the region against, e.g. `8,8`.
    #[arg(long, value_delimiter = ',')]
    pub shape: Option<Vec<usize>>,
}

impl Runnable for Cmd {
    fn run(&self, out: &mut dyn Write) -> Result<(), Error> {
        let region: Region = self.expr.parse()?;
        writeln!(out, "{}", region)?;
        writeln!(out, "absolute: {}", region.is_absolute())?;
        if let Some(shape) = &self.shape {
            let resolved = region.resolve(shape)?;
            resolved.check_bounds(shape)?;
            writeln!(out, "resolved: {}", resolved)?;
            writeln!(out, "elements: {}", resolved.num_elements()?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::Cli;
    use crate::commands::Runnable;

    fn run(args: &[&str]) -> anyhow::Result<String> {
        let cli = Cli::parse_from(args);
        let mut out = Vec::new();
        cli.subcmd.run(&mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn test_run() {
        assert_eq!(
            run(&["pdc", "region", "3, 4:, :5"]).unwrap(),
            "region[3:4, 4:, :5]\nabsolute: false\n"
        );
        assert_eq!(
            run(&["pdc", "region", "2:, 1:3", "--shape", "8,8"]).unwrap(),
            "region[2:, 1:3]\nabsolute: false\nresolved: region[2:8, 1:3]\nelements: 12\n"
        );
    }

    #[test]
    fn test_run_invalid() {
        assert!(run(&["pdc", "region", "5:5"]).is_err());
        assert!(run(&["pdc", "region", "0:9", "--shape", "8"]).is_err());
    }
}
