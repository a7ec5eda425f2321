// src/mailbox/watch.rs

//! Waiting for new mail without busy-polling the inbox file.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::mailbox::{Mailbox, Message, MessageFilter};

/// Re-read interval when no change notification arrives.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Wait until `actor` has unread messages and return them, or return an
/// empty list once `timeout` elapses. Creates the inbox if missing.
///
/// Change notifications wake the waiter early; a periodic re-read covers
/// filesystems where notifications are not delivered.
pub async fn wait_for_unread(
    mailbox: &Mailbox,
    actor: &str,
    timeout: Duration,
) -> Result<Vec<Message>> {
    mailbox.create_inbox(actor)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let inbox = mailbox.layout().inbox_file(actor);
    let _watcher = match watch_inbox(&inbox, tx.clone()) {
        Ok(w) => Some(w),
        Err(err) => {
            warn!(actor = %actor, error = %err, "inbox watcher unavailable; polling only");
            None
        }
    };

    let waiting = poll_until_unread(mailbox, actor, &mut rx);

    let result = match tokio::time::timeout(timeout, waiting).await {
        Ok(result) => result,
        Err(_) => {
            debug!(actor = %actor, timeout_ms = timeout.as_millis() as u64, "no mail before timeout");
            Ok(Vec::new())
        }
    };
    drop(tx);
    result
}

async fn poll_until_unread(
    mailbox: &Mailbox,
    actor: &str,
    changes: &mut mpsc::UnboundedReceiver<()>,
) -> Result<Vec<Message>> {
    loop {
        let unread = mailbox.read(actor, &MessageFilter::unread())?;
        if !unread.is_empty() {
            return Ok(unread);
        }
        tokio::select! {
            _ = changes.recv() => debug!(actor = %actor, "inbox changed"),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

/// Watch the mailbox directory and signal on any event touching `inbox`.
fn watch_inbox(inbox: &Path, tx: mpsc::UnboundedSender<()>) -> notify::Result<RecommendedWatcher> {
    let name: Option<OsString> = inbox.file_name().map(|n| n.to_os_string());
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let touches_inbox = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == name);
                if touches_inbox {
                    // The receiver is gone once the wait finished.
                    let _ = tx.send(());
                }
            }
        },
        Config::default(),
    )?;
    if let Some(dir) = inbox.parent() {
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
    }
    Ok(watcher)
}
