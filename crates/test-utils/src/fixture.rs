use std::path::{Path, PathBuf};

use tempfile::TempDir;

use taskgrid::config::ConfigFile;
use taskgrid::store::Task;
use taskgrid::Grid;

pub const PROJECT: &str = "acme";
pub const TEAM: &str = "core";

/// An initialised team in a temporary directory on the real filesystem.
///
/// The directory is removed when the fixture is dropped.
pub struct TeamFixture {
    dir: TempDir,
    grid: Grid,
}

impl TeamFixture {
    pub fn new() -> Self {
        Self::with_config(ConfigFile::default())
    }

    pub fn with_config(config: ConfigFile) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let grid = Grid::open(dir.path(), PROJECT, TEAM, config).expect("open grid");
        grid.init("fixture").expect("init team");
        Self { dir, grid }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn team_dir(&self) -> PathBuf {
        self.grid.layout().team_dir()
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// A second handle on the same directory, as another process would open it.
    pub fn reopen(&self) -> Grid {
        Grid::open(self.dir.path(), PROJECT, TEAM, self.grid.config().clone()).expect("reopen grid")
    }

    /// Create tasks in order; dependencies must come first.
    pub fn with_tasks(self, tasks: impl IntoIterator<Item = Task>) -> Self {
        for task in tasks {
            self.grid.tasks().create(task, "fixture").expect("create task");
        }
        self
    }
}

impl Default for TeamFixture {
    fn default() -> Self {
        Self::new()
    }
}
