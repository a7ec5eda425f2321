// src/mailbox/mod.rs

//! Per-actor inboxes stored as `mailbox/<actor>.json` (a JSON array in send
//! order).
//!
//! Any actor may send to any inbox, so every write holds the inbox lock.
//! Reads take no lock: files are replaced by rename, so a reader always
//! sees a whole snapshot.

pub mod message;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::{GridError, Result};
use crate::fs::FileSystem;
use crate::layout::{TeamLayout, parse_json, read_team_meta, write_json};
use crate::lock::LockManager;
use crate::types::{ActorId, validate_id};

pub use message::{Message, MessageBody, MessageFilter, MessageKind};
pub use watch::wait_for_unread;

#[derive(Debug, Clone)]
pub struct Mailbox {
    fs: Arc<dyn FileSystem>,
    layout: TeamLayout,
    locks: LockManager,
    clock: Arc<dyn Clock>,
}

impl Mailbox {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        layout: TeamLayout,
        locks: LockManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fs,
            layout,
            locks,
            clock,
        }
    }

    pub fn layout(&self) -> &TeamLayout {
        &self.layout
    }

    /// Create an empty inbox unless one exists. Returns whether it was
    /// created; an existing inbox keeps its history.
    pub fn create_inbox(&self, actor: &str) -> Result<bool> {
        validate_id("actor", actor)?;
        read_team_meta(self.fs.as_ref(), &self.layout)?;
        self.fs.create_dir_all(&self.layout.mailbox_dir())?;

        let path = self.layout.inbox_file(actor);
        let created = self.locks.with_lock(&path, &write_owner(actor), || {
            if self.fs.is_file(&path) {
                return Ok(false);
            }
            write_json(self.fs.as_ref(), &path, &Vec::<Message>::new())?;
            Ok(true)
        })?;
        if created {
            info!(actor = %actor, "inbox created");
        }
        Ok(created)
    }

    /// Append a message to `to`'s inbox, creating it if needed.
    pub fn send(&self, from: &str, to: &str, body: MessageBody) -> Result<Message> {
        validate_id("actor", from)?;
        validate_id("actor", to)?;
        read_team_meta(self.fs.as_ref(), &self.layout)?;
        self.fs.create_dir_all(&self.layout.mailbox_dir())?;

        let message = Message {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            body,
            timestamp: self.clock.now(),
            read: false,
        };

        let path = self.layout.inbox_file(to);
        self.locks.with_lock(&path, &write_owner(from), || {
            let mut inbox = if self.fs.is_file(&path) {
                self.load(&path)?
            } else {
                Vec::new()
            };
            inbox.push(message.clone());
            write_json(self.fs.as_ref(), &path, &inbox)
        })?;

        debug!(from = %from, to = %to, id = %message.id, kind = %message.body.kind(), "message sent");
        Ok(message)
    }

    /// Send `body` to every existing inbox except the sender's.
    pub fn broadcast(&self, from: &str, body: MessageBody) -> Result<Vec<Message>> {
        let mut sent = Vec::new();
        for actor in self.inboxes()? {
            if actor == from {
                continue;
            }
            sent.push(self.send(from, &actor, body.clone())?);
        }
        info!(from = %from, recipients = sent.len(), "broadcast sent");
        Ok(sent)
    }

    /// Snapshot of `actor`'s inbox in send order.
    pub fn read(&self, actor: &str, filter: &MessageFilter) -> Result<Vec<Message>> {
        validate_id("actor", actor)?;
        let path = self.layout.inbox_file(actor);
        if !self.fs.is_file(&path) {
            return Err(GridError::not_found("inbox", actor));
        }
        Ok(self
            .load(&path)?
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect())
    }

    /// Flip one message to read. An unknown message id is not an error;
    /// the return value says whether anything changed.
    pub fn mark_as_read(&self, actor: &str, message_id: &str) -> Result<bool> {
        self.rewrite(actor, |inbox| {
            match inbox.iter_mut().find(|m| m.id == message_id && !m.read) {
                Some(message) => {
                    message.read = true;
                    true
                }
                None => false,
            }
        })
    }

    /// Drop read messages. Returns how many were removed.
    pub fn prune(&self, actor: &str) -> Result<usize> {
        let mut removed = 0;
        self.rewrite(actor, |inbox| {
            let before = inbox.len();
            inbox.retain(|m| !m.read);
            removed = before - inbox.len();
            removed > 0
        })?;
        if removed > 0 {
            info!(actor = %actor, removed, "inbox pruned");
        }
        Ok(removed)
    }

    /// Actors that have an inbox, sorted.
    pub fn inboxes(&self) -> Result<Vec<ActorId>> {
        let dir = self.layout.mailbox_dir();
        if !self.fs.is_dir(&dir) {
            read_team_meta(self.fs.as_ref(), &self.layout)?;
            return Ok(Vec::new());
        }
        let mut actors: Vec<ActorId> = self
            .fs
            .read_dir(&dir)?
            .into_iter()
            .filter(|p| self.fs.is_file(p) && p.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        actors.sort();
        Ok(actors)
    }

    /// Locked read-modify-write of an existing inbox; `f` returns whether it
    /// changed anything.
    fn rewrite<F>(&self, actor: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Vec<Message>) -> bool,
    {
        validate_id("actor", actor)?;
        let path = self.layout.inbox_file(actor);
        if !self.fs.is_file(&path) {
            return Err(GridError::not_found("inbox", actor));
        }
        self.locks.with_lock(&path, &write_owner(actor), || {
            if !self.fs.is_file(&path) {
                return Err(GridError::not_found("inbox", actor));
            }
            let mut inbox = self.load(&path)?;
            let changed = f(&mut inbox);
            if changed {
                write_json(self.fs.as_ref(), &path, &inbox)?;
            }
            Ok(changed)
        })
    }

    fn load(&self, path: &Path) -> Result<Vec<Message>> {
        let raw = self.fs.read_to_string(path)?;
        parse_json(path, &raw)
    }
}

/// Lock owner for one inbox write. Never shared, so two writers acting as
/// the same actor cannot re-enter each other's lock.
fn write_owner(actor: &str) -> String {
    format!("{actor}@{}-{}", std::process::id(), Uuid::new_v4().simple())
}
