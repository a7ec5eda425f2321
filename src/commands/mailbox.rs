// src/commands/mailbox.rs

use std::time::Duration;

use serde_json::{Value, json};
use uuid::Uuid;

use crate::cli::{MailboxCommand, SendArgs};
use crate::commands::to_json;
use crate::errors::{GridError, Result};
use crate::grid::Grid;
use crate::mailbox::{MessageBody, MessageFilter, MessageKind, wait_for_unread};

pub fn run(grid: &Grid, command: MailboxCommand) -> Result<Value> {
    let mailbox = grid.mailbox();
    match command {
        MailboxCommand::Create { actor } => {
            let created = mailbox.create_inbox(&actor)?;
            Ok(json!({ "actor": actor, "created": created }))
        }
        MailboxCommand::Send(args) => {
            let (from, to) = (args.from.clone(), args.to.clone());
            to_json(mailbox.send(&from, &to, body_from_args(args)?)?)
        }
        MailboxCommand::Broadcast { from, text } => {
            to_json(mailbox.broadcast(&from, MessageBody::Message { text })?)
        }
        MailboxCommand::Read {
            actor,
            unread,
            kind,
        } => to_json(mailbox.read(
            &actor,
            &MessageFilter {
                unread_only: unread,
                kind,
            },
        )?),
        MailboxCommand::MarkRead { actor, id } => {
            let marked = mailbox.mark_as_read(&actor, &id)?;
            Ok(json!({ "id": id, "marked": marked }))
        }
        MailboxCommand::Prune { actor } => Ok(json!({ "removed": mailbox.prune(&actor)? })),
        MailboxCommand::Wait { .. } => Err(GridError::Validation(
            "mailbox wait runs asynchronously".to_string(),
        )),
    }
}

pub async fn wait(grid: &Grid, actor: &str, timeout_ms: u64) -> Result<Value> {
    let messages = wait_for_unread(grid.mailbox(), actor, Duration::from_millis(timeout_ms)).await?;
    to_json(messages)
}

fn body_from_args(args: SendArgs) -> Result<MessageBody> {
    match args.kind {
        MessageKind::Message => {
            let text = args.text.ok_or_else(|| {
                GridError::Validation("--text is required for type message".to_string())
            })?;
            Ok(MessageBody::Message { text })
        }
        MessageKind::IdleNotification => Ok(MessageBody::IdleNotification {
            reason: args.reason.unwrap_or_else(|| "idle".to_string()),
            completed_task: args.task,
        }),
        MessageKind::ShutdownRequest => Ok(MessageBody::ShutdownRequest {
            request_id: args
                .request_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            reason: args.reason.unwrap_or_default(),
        }),
        MessageKind::ShutdownResponse => {
            let request_id = args.request_id.ok_or_else(|| {
                GridError::Validation(
                    "--request-id is required for type shutdown-response".to_string(),
                )
            })?;
            if args.approved == args.rejected {
                return Err(GridError::Validation(
                    "shutdown-response needs exactly one of --approved or --rejected".to_string(),
                ));
            }
            Ok(MessageBody::ShutdownResponse {
                request_id,
                approved: args.approved,
                reason: args.reason,
            })
        }
    }
}
