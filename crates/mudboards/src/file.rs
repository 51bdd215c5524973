//! Board file loader and serializer.
//!
//! One file per vnum under the board root. Layout:
//!
//! ```text
//! Board File
//! <read> <write> <remove> <count> <version>
//! #<seq>
//! <poster id or name>
//! <timestamp>
//! <subject>
//! <body, terminated by a line ending in '~'>
//! S<bucket> <reader id or name> <timestamp>
//! ```
//!
//! The loader is deliberately forgiving: short control lines get defaults,
//! malformed message blocks are skipped, read records that point at no
//! message are dropped, and a wrong declared count is corrected and the
//! file rewritten on the spot.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use tracing::warn;

use crate::board::{Board, Levels, Version};
use crate::identity::{Identity, NameDirectory};
use crate::memory::{bucket_for, ReadRecord, BUCKETS};
use crate::message::{Message, MessageIdGen};
use crate::registry::{BoardConfig, ObjectDirectory};

pub const FILE_HEADER: &str = "Board File";

pub fn board_path(dir: &Path, vnum: i64) -> PathBuf {
    dir.join(vnum.to_string())
}

/// Load one board file. Returns `None` for every non-board outcome:
/// missing file, bad header, or a stale orphan (no backing object and
/// past the retention window, in which case the file is deleted too).
pub fn load_board(
    cfg: &BoardConfig,
    vnum: i64,
    objects: &dyn ObjectDirectory,
    names: &dyn NameDirectory,
    ids: &mut MessageIdGen,
) -> Option<Board> {
    let path = board_path(&cfg.dir, vnum);
    let text = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(err=%e, vnum, "unable to open board file");
            return None;
        }
    };

    let lines: Vec<&str> = text.lines().collect();
    if lines.first().copied() != Some(FILE_HEADER) {
        warn!(vnum, path=%path.display(), "invalid board file header; not loading");
        return None;
    }

    let fields: Vec<i64> = lines
        .get(1)
        .map(|l| l.split_whitespace().map_while(|t| t.parse().ok()).collect())
        .unwrap_or_default();

    let (mut levels, declared, version) = match fields.len() {
        n if n >= 5 => (
            Levels {
                read: fields[0] as i32,
                write: fields[1] as i32,
                remove: fields[2] as i32,
            },
            fields[3],
            Version::from_wire(fields[4]),
        ),
        4 => {
            warn!(vnum, "control line has 4 fields, expected 5; assuming legacy version");
            (
                Levels {
                    read: fields[0] as i32,
                    write: fields[1] as i32,
                    remove: fields[2] as i32,
                },
                fields[3],
                Version::Legacy,
            )
        }
        _ => {
            warn!(vnum, "unparseable control line; falling back to defaults");
            (Levels::IMMORTAL_ONLY, -1, Version::Legacy)
        }
    };

    match objects.board_levels(vnum) {
        Some(from_obj) => {
            if from_obj != levels {
                warn!(vnum, "board file thresholds disagree with object definition; using the object's");
            }
            levels = from_obj;
        }
        None => {
            let age = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok());
            if age.is_some_and(|a| a > cfg.retention) {
                warn!(vnum, path=%path.display(), "no backing object and past retention; deleting board file");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(err=%e, vnum, "unable to delete stale board file");
                }
                return None;
            }
            warn!(vnum, "no backing object for board; keeping file thresholds");
        }
    }

    let mut board = Board::new(vnum, levels, version);
    board.declared_count = declared;

    let mut i = 2;
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with('#') {
            i += 1;
            match parse_message_block(&lines, &mut i, version, ids) {
                Some(msg) => board.store.push_loaded(msg),
                None => warn!(vnum, "parse error in message block; skipping"),
            }
        } else if let Some(rest) = line.strip_prefix('S') {
            if let Some((bucket, rec)) = parse_read_record(rest, version) {
                let belongs = board.store.as_slice().iter().any(|m| {
                    m.timestamp == rec.timestamp
                        && bucket_for(m.timestamp, m.poster.numeric_form(names)) == bucket
                });
                if belongs {
                    board.memory.insert_at(bucket, rec);
                }
                // Orphaned records are dropped silently; their message is
                // long gone.
            }
            i += 1;
        } else {
            i += 1;
        }
    }

    let actual = board.store.len() as i64;
    if actual != board.declared_count {
        warn!(
            vnum,
            declared = board.declared_count,
            actual,
            "message count drift; correcting and re-saving"
        );
        board.declared_count = actual;
        persist(cfg, &board);
    }

    Some(board)
}

/// One `#`-introduced message block. `i` points at the poster line and is
/// advanced past everything consumed; on a malformed field it stays at the
/// offending line so the outer scan can resume there.
fn parse_message_block(
    lines: &[&str],
    i: &mut usize,
    version: Version,
    ids: &mut MessageIdGen,
) -> Option<Message> {
    let poster = match version {
        Version::Legacy => Identity::Id(lines.get(*i)?.trim().parse().ok()?),
        Version::Current => Identity::Name(lines.get(*i)?.split_whitespace().next()?.to_string()),
    };
    *i += 1;

    let timestamp: i64 = lines.get(*i)?.trim().parse().ok()?;
    *i += 1;

    let subject = lines.get(*i).copied().unwrap_or("").to_string();
    *i += 1;

    let mut body_lines: Vec<&str> = Vec::new();
    let mut terminated = false;
    while *i < lines.len() {
        let line = lines[*i];
        *i += 1;
        if let Some(pos) = line.find('~') {
            body_lines.push(&line[..pos]);
            terminated = true;
            break;
        }
        body_lines.push(line);
    }
    if !terminated {
        // Truncated file; keep what was there.
        body_lines.push("");
    }

    Some(Message {
        id: ids.next_id(),
        poster,
        timestamp,
        subject,
        body: Some(body_lines.join("\n")),
    })
}

fn parse_read_record(rest: &str, version: Version) -> Option<(usize, ReadRecord)> {
    let mut it = rest.split_whitespace();
    let bucket: usize = it.next()?.parse().ok()?;
    let reader = match version {
        Version::Legacy => Identity::Id(it.next()?.parse().ok()?),
        Version::Current => Identity::Name(it.next()?.to_string()),
    };
    let timestamp: i64 = it.next()?.parse().ok()?;
    if bucket >= BUCKETS {
        return None;
    }
    Some((bucket, ReadRecord { reader, timestamp }))
}

/// Write the whole board back out: tmp file, then rename over the old one,
/// so a failed write never touches the previous copy.
pub fn save_board(cfg: &BoardConfig, board: &Board) -> anyhow::Result<()> {
    let mut out = String::new();
    let _ = writeln!(out, "{FILE_HEADER}");
    let _ = writeln!(
        out,
        "{} {} {} {} {}",
        board.levels.read,
        board.levels.write,
        board.levels.remove,
        board.declared_count,
        board.version.wire()
    );

    for (seq, msg) in board.store.as_slice().iter().enumerate() {
        let _ = writeln!(out, "#{}", seq + 1);
        match &msg.poster {
            Identity::Id(n) => {
                let _ = writeln!(out, "{n}");
            }
            Identity::Name(s) => {
                let _ = writeln!(out, "{}", if s.is_empty() { "Unknown" } else { s });
            }
        }
        let _ = writeln!(out, "{}", msg.timestamp);
        let _ = writeln!(
            out,
            "{}",
            if msg.subject.is_empty() {
                "No Subject"
            } else {
                &msg.subject
            }
        );
        let _ = writeln!(out, "{}~", msg.body.as_deref().unwrap_or(""));
    }

    for (bucket, rec) in board.memory.iter() {
        match &rec.reader {
            Identity::Id(n) => {
                let _ = writeln!(out, "S{bucket} {n} {}", rec.timestamp);
            }
            Identity::Name(s) => {
                let _ = writeln!(out, "S{bucket} {s} {}", rec.timestamp);
            }
        }
    }

    let path = board_path(&cfg.dir, board.vnum);
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, out).with_context(|| format!("unable to write board file {tmp:?}"))?;
    fs::rename(&tmp, &path)
        .with_context(|| format!("unable to move board file into place at {path:?}"))?;
    Ok(())
}

/// Save for callers that absorb failures: the in-memory board stays the
/// source of truth either way.
pub fn persist(cfg: &BoardConfig, board: &Board) {
    if let Err(e) = save_board(cfg, board) {
        warn!(err=%e, vnum = board.vnum, "board save failed");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{board_path, load_board, save_board};
    use crate::board::{Levels, Version, IMMORTAL_TIER};
    use crate::identity::{Identity, NameDirectory};
    use crate::message::MessageIdGen;
    use crate::registry::{BoardConfig, ObjectDirectory};

    struct Objects(HashMap<i64, Levels>);

    impl ObjectDirectory for Objects {
        fn board_levels(&self, vnum: i64) -> Option<Levels> {
            self.0.get(&vnum).copied()
        }
    }

    struct Names(HashMap<String, i64>);

    impl NameDirectory for Names {
        fn id_by_name(&self, name: &str) -> Option<i64> {
            self.0.get(name).copied()
        }
        fn name_by_id(&self, id: i64) -> Option<String> {
            self.0
                .iter()
                .find(|(_, v)| **v == id)
                .map(|(k, _)| k.clone())
        }
    }

    fn cfg_in(dir: &std::path::Path) -> BoardConfig {
        BoardConfig {
            dir: dir.to_path_buf(),
            ..BoardConfig::default()
        }
    }

    fn names() -> Names {
        Names(HashMap::from([("Alice".to_string(), 42), ("Bob".to_string(), 7)]))
    }

    fn objects(vnum: i64) -> Objects {
        Objects(HashMap::from([(
            vnum,
            Levels {
                read: 0,
                write: 5,
                remove: 10,
            },
        )]))
    }

    #[test]
    fn bad_header_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = cfg_in(tmp.path());
        std::fs::write(board_path(&cfg.dir, 3001), "Bulletin\n0 0 0 0 2\n").unwrap();

        let mut ids = MessageIdGen::default();
        assert!(load_board(&cfg, 3001, &objects(3001), &names(), &mut ids).is_none());
        // The file itself is left alone.
        assert!(board_path(&cfg.dir, 3001).exists());
    }

    #[test]
    fn four_field_control_line_defaults_to_legacy() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = cfg_in(tmp.path());
        std::fs::write(board_path(&cfg.dir, 3001), "Board File\n3 2 2 4\n").unwrap();

        let mut ids = MessageIdGen::default();
        let board = load_board(&cfg, 3001, &objects(3001), &names(), &mut ids).unwrap();
        assert_eq!(board.version, Version::Legacy);
        // Object thresholds win over the file's.
        assert_eq!(board.levels.write, 5);
    }

    #[test]
    fn short_control_line_gets_full_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = cfg_in(tmp.path());
        std::fs::write(board_path(&cfg.dir, 3001), "Board File\n3 junk\n").unwrap();

        let mut ids = MessageIdGen::default();
        let board =
            load_board(&cfg, 3001, &Objects(HashMap::new()), &names(), &mut ids).unwrap();
        assert_eq!(board.version, Version::Legacy);
        assert_eq!(board.levels.read, IMMORTAL_TIER);
        // Declared -1 versus 0 actual messages is drift; self-healing
        // rewrites the file with the true count.
        assert_eq!(board.declared_count, 0);
    }

    #[test]
    fn stale_orphan_file_is_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = cfg_in(tmp.path());
        cfg.retention = Duration::ZERO;
        std::fs::write(board_path(&cfg.dir, 4000), "Board File\n0 0 0 0 2\n").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let mut ids = MessageIdGen::default();
        assert!(load_board(&cfg, 4000, &Objects(HashMap::new()), &names(), &mut ids).is_none());
        assert!(!board_path(&cfg.dir, 4000).exists());
    }

    #[test]
    fn fresh_orphan_keeps_file_thresholds() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = cfg_in(tmp.path());
        std::fs::write(board_path(&cfg.dir, 4000), "Board File\n3 2 2 0 2\n").unwrap();

        let mut ids = MessageIdGen::default();
        let board =
            load_board(&cfg, 4000, &Objects(HashMap::new()), &names(), &mut ids).unwrap();
        assert_eq!(
            board.levels,
            Levels {
                read: 3,
                write: 2,
                remove: 2
            }
        );
    }

    #[test]
    fn current_format_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = cfg_in(tmp.path());
        let file = "Board File\n\
                    0 5 10 2 2\n\
                    #1\n\
                    Bob\n\
                    2000\n\
                    Re: Hello\n\
                    quoting you\n\
                    with two lines~\n\
                    #2\n\
                    Alice\n\
                    1000\n\
                    Hello\n\
                    hi there~\n\
                    S139 Bob 1000\n";
        std::fs::write(board_path(&cfg.dir, 3001), file).unwrap();

        let mut ids = MessageIdGen::default();
        let board = load_board(&cfg, 3001, &objects(3001), &names(), &mut ids).unwrap();
        assert_eq!(board.store.len(), 2);
        assert_eq!(board.declared_count, 2);
        let newest = board.store.get(0).unwrap();
        assert_eq!(newest.poster, Identity::Name("Bob".to_string()));
        assert_eq!(newest.body.as_deref(), Some("quoting you\nwith two lines"));
        assert_eq!(board.memory.record_count(), 1);

        save_board(&cfg, &board).unwrap();
        let mut ids2 = MessageIdGen::default();
        let again = load_board(&cfg, 3001, &objects(3001), &names(), &mut ids2).unwrap();
        assert_eq!(again.store.len(), 2);
        assert_eq!(again.memory.record_count(), 1);
        assert_eq!(again.store.get(1).unwrap().subject, "Hello");
        assert_eq!(
            again.store.get(0).unwrap().body,
            board.store.get(0).unwrap().body
        );
    }

    #[test]
    fn legacy_format_keeps_numeric_identities() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = cfg_in(tmp.path());
        // bucket(1000, 42) = (1000 % 301 + 42 % 301) % 301 = 139
        let file = "Board File\n\
                    0 5 10 1 1\n\
                    #1\n\
                    42\n\
                    1000\n\
                    Old news\n\
                    from the archive~\n\
                    S139 7 1000\n";
        std::fs::write(board_path(&cfg.dir, 3001), file).unwrap();

        let mut ids = MessageIdGen::default();
        let board = load_board(&cfg, 3001, &objects(3001), &names(), &mut ids).unwrap();
        assert_eq!(board.version, Version::Legacy);
        assert_eq!(board.store.get(0).unwrap().poster, Identity::Id(42));
        assert_eq!(board.memory.record_count(), 1);
        assert!(board
            .memory
            .is_read(139, &Identity::Id(7), 1000));

        // Saving keeps the legacy version marker so the next load still
        // decodes numeric identities.
        save_board(&cfg, &board).unwrap();
        let text = std::fs::read_to_string(board_path(&cfg.dir, 3001)).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with(" 1"));
    }

    #[test]
    fn orphaned_read_records_are_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = cfg_in(tmp.path());
        let file = "Board File\n\
                    0 5 10 1 2\n\
                    #1\n\
                    Alice\n\
                    1000\n\
                    Hello\n\
                    hi~\n\
                    S139 Bob 9999\n\
                    S12 Bob 1000\n";
        // First record: right bucket shape, no message at 9999. Second:
        // timestamp matches but the bucket doesn't. Both go.
        std::fs::write(board_path(&cfg.dir, 3001), file).unwrap();

        let mut ids = MessageIdGen::default();
        let board = load_board(&cfg, 3001, &objects(3001), &names(), &mut ids).unwrap();
        assert_eq!(board.memory.record_count(), 0);
    }

    #[test]
    fn count_drift_is_corrected_and_rewritten() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = cfg_in(tmp.path());
        let file = "Board File\n\
                    0 5 10 9 2\n\
                    #1\n\
                    Alice\n\
                    1000\n\
                    Hello\n\
                    hi~\n";
        std::fs::write(board_path(&cfg.dir, 3001), file).unwrap();

        let mut ids = MessageIdGen::default();
        let board = load_board(&cfg, 3001, &objects(3001), &names(), &mut ids).unwrap();
        assert_eq!(board.declared_count, 1);

        // The rewrite hit the disk: a second load sees no drift.
        let text = std::fs::read_to_string(board_path(&cfg.dir, 3001)).unwrap();
        assert!(text.lines().nth(1).unwrap().starts_with("0 5 10 1"));
    }

    #[test]
    fn malformed_message_block_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = cfg_in(tmp.path());
        let file = "Board File\n\
                    0 5 10 2 1\n\
                    #1\n\
                    not-a-number\n\
                    1000\n\
                    Broken\n\
                    lost~\n\
                    #2\n\
                    42\n\
                    2000\n\
                    Fine\n\
                    kept~\n";
        std::fs::write(board_path(&cfg.dir, 3001), file).unwrap();

        let mut ids = MessageIdGen::default();
        let board = load_board(&cfg, 3001, &objects(3001), &names(), &mut ids).unwrap();
        assert_eq!(board.store.len(), 1);
        assert_eq!(board.store.get(0).unwrap().subject, "Fine");
        assert_eq!(board.declared_count, 1);
    }
}
