// src/commands/task.rs

use serde_json::{Value, json};

use crate::cli::{EvidenceArgs, NewTaskArgs, PlanCommand, TaskCommand};
use crate::commands::to_json;
use crate::errors::{GridError, Result};
use crate::grid::Grid;
use crate::plan::{import_plan, load_plan};
use crate::store::{Evidence, Task, TaskFilter};

pub fn run(grid: &Grid, actor: &str, command: TaskCommand) -> Result<Value> {
    match command {
        TaskCommand::Create { task } => to_json(grid.tasks().create(new_task(task), actor)?),
        TaskCommand::Get { id } => to_json(grid.tasks().get(&id)?),
        TaskCommand::List {
            status,
            role,
            owner,
            wave,
            ready,
        } => to_json(grid.tasks().list(&TaskFilter {
            status,
            role,
            owner,
            wave,
            ready,
        })?),
        TaskCommand::Edit {
            id,
            title,
            description,
        } => {
            if title.is_none() && description.is_none() {
                return Err(GridError::Validation(
                    "nothing to edit: pass --title and/or --description".to_string(),
                ));
            }
            to_json(grid.tasks().edit(&id, actor, title, description)?)
        }
        TaskCommand::Delete { id } => to_json(grid.tasks().delete(&id, actor)?),
        TaskCommand::Claim {
            owner,
            id,
            role,
            strict,
        } => to_json(
            grid.claims()
                .claim(id.as_deref(), &owner, role.as_deref(), strict)?,
        ),
        TaskCommand::Release { id, owner } => to_json(grid.claims().release(&id, &owner)?),
        TaskCommand::Resolve { id, owner, note } => {
            let note = note.map(|text| Evidence::Note { text });
            to_json(grid.claims().resolve(&id, &owner, note)?)
        }
        TaskCommand::Evidence(args) => {
            let evidence = evidence_from_args(&args)?;
            to_json(grid.claims().append_evidence(&args.id, &args.owner, evidence)?)
        }
    }
}

pub fn run_plan(grid: &Grid, actor: &str, command: PlanCommand) -> Result<Value> {
    match command {
        PlanCommand::Import { file } => {
            let plan = load_plan(&file)?;
            let created = import_plan(grid.tasks(), &plan, actor)?;
            let ids: Vec<&str> = created.iter().map(|t| t.id.as_str()).collect();
            Ok(json!({ "created": ids }))
        }
    }
}

pub(crate) fn new_task(args: NewTaskArgs) -> Task {
    let mut task = Task::new(args.id, args.title)
        .with_description(args.description)
        .blocked_by(args.blocked_by.into_iter().filter(|d| !d.trim().is_empty()));
    task.role = args.role;
    task
}

fn evidence_from_args(args: &EvidenceArgs) -> Result<Evidence> {
    if let Some(text) = &args.note {
        return Ok(Evidence::Note { text: text.clone() });
    }
    if let Some(command) = &args.command {
        return Ok(Evidence::Command {
            command: command.clone(),
            exit_code: args.exit_code,
        });
    }
    if let Some(path) = &args.file {
        return Ok(Evidence::File {
            path: path.clone(),
            action: args.action.clone(),
        });
    }
    if let Some(name) = &args.test {
        if args.passed == args.failed {
            return Err(GridError::Validation(
                "test evidence needs exactly one of --passed or --failed".to_string(),
            ));
        }
        return Ok(Evidence::Test {
            name: name.clone(),
            passed: args.passed,
        });
    }
    Err(GridError::Validation(
        "evidence needs one of --note, --command, --file or --test".to_string(),
    ))
}
