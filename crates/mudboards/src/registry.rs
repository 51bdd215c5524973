//! In-memory catalogue of loaded boards, plus startup and teardown.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use crate::board::{Board, Levels, Version};
use crate::file;
use crate::identity::NameDirectory;
use crate::message::MessageIdGen;

/// World-object definitions, as far as boards care: the clearance triple
/// configured on the object a board is bound to, when that object exists.
pub trait ObjectDirectory {
    fn board_levels(&self, vnum: i64) -> Option<Levels>;
}

#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// Root directory holding one file per board vnum.
    pub dir: PathBuf,
    /// How long an orphaned board file (no backing object) survives.
    pub retention: Duration,
    pub max_body_len: usize,
    pub max_subject_len: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("boards"),
            retention: Duration::from_secs(60 * 60 * 24 * 7),
            max_body_len: 4096,
            max_subject_len: 80,
        }
    }
}

/// Sole owner of every loaded board, keyed by vnum.
#[derive(Debug)]
pub struct BoardRegistry {
    cfg: BoardConfig,
    boards: HashMap<i64, Board>,
    ids: MessageIdGen,
}

impl BoardRegistry {
    pub fn new(cfg: BoardConfig) -> Self {
        Self {
            cfg,
            boards: HashMap::new(),
            ids: MessageIdGen::default(),
        }
    }

    pub fn config(&self) -> &BoardConfig {
        &self.cfg
    }

    pub fn locate(&self, vnum: i64) -> Option<&Board> {
        self.boards.get(&vnum)
    }

    pub fn locate_mut(&mut self, vnum: i64) -> Option<&mut Board> {
        self.boards.get_mut(&vnum)
    }

    pub fn ids_mut(&mut self) -> &mut MessageIdGen {
        &mut self.ids
    }

    pub fn board_count(&self) -> usize {
        self.boards.len()
    }

    pub fn message_count(&self) -> usize {
        self.boards.values().map(|b| b.store.len()).sum()
    }

    /// Look up a board, creating an empty one at the current version if
    /// none is loaded. Thresholds come from the backing object, or default
    /// to immortal-only when the vnum has none. The new board is persisted
    /// before it is handed out.
    pub fn ensure(&mut self, vnum: i64, objects: &dyn ObjectDirectory) -> &mut Board {
        match self.boards.entry(vnum) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let path = file::board_path(&self.cfg.dir, vnum);
                if path.exists() {
                    // A file we failed to load earlier; start over.
                    warn!(vnum, "preexisting file for an unloaded board; replacing it");
                    if let Err(err) = fs::remove_file(&path) {
                        warn!(err=%err, vnum, "unable to remove old board file");
                    }
                }

                let levels = match objects.board_levels(vnum) {
                    Some(lv) => lv,
                    None => {
                        info!(vnum, "creating board with no backing object; defaulting thresholds");
                        Levels::IMMORTAL_ONLY
                    }
                };

                let mut board = Board::new(vnum, levels, Version::Current);
                board.sync_count();
                file::persist(&self.cfg, &board);
                info!(vnum, "created new board");
                e.insert(board)
            }
        }
    }

    /// Startup scan. Creating the board root is the one fatal condition in
    /// this subsystem; everything after that is per-file and forgiving.
    pub fn init_all(
        &mut self,
        objects: &dyn ObjectDirectory,
        names: &dyn NameDirectory,
    ) -> anyhow::Result<()> {
        fs::create_dir_all(&self.cfg.dir).with_context(|| {
            format!("unable to open or create board directory {:?}", self.cfg.dir)
        })?;

        let entries = match fs::read_dir(&self.cfg.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(err=%e, dir=%self.cfg.dir.display(), "unable to scan board directory");
                return Ok(());
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == "." || name == ".." || name == ".cvsignore" {
                continue;
            }
            let Ok(vnum) = name.parse::<i64>() else {
                warn!(file = name, "skipping invalid board filename");
                continue;
            };
            if let Some(board) = file::load_board(&self.cfg, vnum, objects, names, &mut self.ids) {
                self.boards.insert(vnum, board);
            }
        }

        info!(
            boards = self.board_count(),
            messages = self.message_count(),
            "boards loaded"
        );
        Ok(())
    }

    /// Drop every board with its messages and read records.
    pub fn teardown(&mut self) {
        self.boards.clear();
    }
}
