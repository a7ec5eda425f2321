// src/grid.rs

//! One team's coordination state, wired together.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::claim::ClaimProtocol;
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigFile;
use crate::dag::{Wave, WaveStore};
use crate::errors::Result;
use crate::fs::{FileSystem, RealFileSystem};
use crate::layout::{TeamLayout, TeamMeta};
use crate::lock::LockManager;
use crate::mailbox::Mailbox;
use crate::reclaim::Reclaimer;
use crate::store::{TaskStore, TaskSummary};
use crate::types::ActorId;

/// Snapshot for `taskgrid status`.
#[derive(Debug, Clone, Serialize)]
pub struct GridStatus {
    pub team: TeamMeta,
    pub tasks: TaskSummary,
    pub waves: Vec<Wave>,
    pub inboxes: Vec<ActorId>,
}

#[derive(Debug, Clone)]
pub struct Grid {
    store: TaskStore,
    mailbox: Mailbox,
    config: ConfigFile,
}

impl Grid {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
        layout: TeamLayout,
        config: ConfigFile,
    ) -> Self {
        let locks = LockManager::new(fs.clone(), clock.clone(), config.lock_options());
        let store = TaskStore::new(fs.clone(), layout.clone(), locks.clone(), clock.clone());
        let mailbox = Mailbox::new(fs, layout, locks, clock);
        Self {
            store,
            mailbox,
            config,
        }
    }

    /// A grid on the real filesystem and wall clock.
    pub fn open(
        root: impl Into<PathBuf>,
        project: &str,
        team: &str,
        config: ConfigFile,
    ) -> Result<Self> {
        let layout = TeamLayout::new(root, project, team)?;
        Ok(Self::new(
            Arc::new(RealFileSystem),
            Arc::new(SystemClock),
            layout,
            config,
        ))
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn layout(&self) -> &TeamLayout {
        self.store.layout()
    }

    /// Create the team directory tree; safe to repeat.
    pub fn init(&self, actor: &str) -> Result<TeamMeta> {
        self.store.init_team(actor)
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.store
    }

    pub fn claims(&self) -> ClaimProtocol<'_> {
        ClaimProtocol::new(&self.store, self.config.claim_policy())
    }

    pub fn waves(&self) -> WaveStore<'_> {
        WaveStore::new(&self.store)
    }

    pub fn reclaimer(&self) -> Reclaimer<'_> {
        Reclaimer::new(&self.store)
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn status(&self) -> Result<GridStatus> {
        Ok(GridStatus {
            team: self.store.meta()?,
            tasks: self.store.summary()?,
            waves: self.waves().list()?,
            inboxes: self.mailbox.inboxes()?,
        })
    }
}
