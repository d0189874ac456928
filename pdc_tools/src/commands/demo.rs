/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io::Write;

use clap::Parser;
use pdc::DataType;
use pdc::Lifetime;
use pdc::ObjectProperties;
use pdc::Region;
use pdc::Session;

use crate::commands::Error;
use crate::commands::Runnable;

const SIZE: usize = 8;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// Print the matches of `board >= THRESHOLD` after filling the board.
    #[arg(long, default_value_t = 5)]
    pub threshold: i8,
}

impl Runnable for Cmd {
    fn run(&self, out: &mut dyn Write) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let (grid, hits) = runtime.block_on(checkerboard(self.threshold))?;
        for row in grid.chunks(SIZE) {
            writeln!(out, "{}", row.iter().map(|v| v.to_string()).collect::<String>())?;
        }
        writeln!(out, "board >= {}: {:?}", self.threshold, hits)?;
        Ok(())
    }
}

/// Fill an 8x8 board with six concurrent writes into disjoint regions,
/// then read it back and query it.
async fn checkerboard(threshold: i8) -> Result<(Vec<i8>, Vec<Vec<usize>>), Error> {
    let session = Session::simulated();
    let cont = session.create_container_with_lifetime("demo", Lifetime::Transient)?;
    let props = ObjectProperties::new([SIZE, SIZE], DataType::Int8)?;
    let board = cont.create_object("board", &props, Lifetime::Transient)?;

    let mut handles = Vec::new();
    for (expr, value) in [
        (":2, :", 1i8),
        ("2:, 1:3", 2),
        ("2:4, :1", 3),
        ("2:4, 3:", 4),
        ("4:6, 4", 5),
        ("6, 5:7", 6),
    ] {
        let region: Region = expr.parse()?;
        let len = board.absolute_region(Some(&region))?.num_elements()?;
        handles.push(board.set_values(Some(&region), &vec![value; len])?);
        tracing::info!("submitted write of {} to {}", value, region);
    }
    for handle in &handles {
        handle.wait().await?;
    }

    let grid = board.get_data(None)?.wait().await?.values::<i8>()?;
    let outcome = board.data().ge(threshold).evaluate(None)?.wait().await?;
    let hits = outcome
        .selection(&board)
        .map(|selection| selection.coordinates())
        .transpose()?
        .unwrap_or_default();

    drop(handles);
    board.close()?;
    session.close()?;
    Ok((grid, hits))
}
