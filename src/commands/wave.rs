// src/commands/wave.rs

use serde_json::{Value, json};

use crate::cli::WaveCommand;
use crate::commands::task::new_task;
use crate::commands::to_json;
use crate::errors::Result;
use crate::grid::Grid;

pub fn run(grid: &Grid, actor: &str, command: WaveCommand) -> Result<Value> {
    let waves = grid.waves();
    match command {
        WaveCommand::Plan => to_json(waves.plan(actor)?),
        WaveCommand::List => to_json(waves.list()?),
        WaveCommand::Start { id } => to_json(waves.start(id, actor)?),
        WaveCommand::Refresh => Ok(json!({ "completed": waves.refresh(actor)? })),
        WaveCommand::Verify {
            id,
            passed,
            failed: _,
            by,
            notes,
        } => to_json(waves.verify(id, passed, notes, &by)?),
        WaveCommand::Fixup { wave, task } => to_json(waves.add_fixup(wave, new_task(task), actor)?),
    }
}
