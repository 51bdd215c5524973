//! Board operations: show, read, write, respond, remove.
//!
//! `BoardService` is the single entry point command handlers get. It owns
//! the registry, the collaborator directories, and the draft-session
//! registry, and it decides when a mutation has to hit the disk. Writing
//! and responding only open a draft; the external line editor fills the
//! body across later command cycles and reports back through
//! [`BoardService::finish_draft`].

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{TimeZone, Utc};
use tracing::info;

use crate::file;
use crate::identity::{Actor, NameDirectory};
use crate::memory::bucket_for;
use crate::message::{Message, MessageId};
use crate::registry::{BoardConfig, BoardRegistry, ObjectDirectory};
use crate::BoardError;

/// Claim ticket for a message body handed off to the editor. Whoever runs
/// the editor session resolves it exactly once via `finish_draft`.
#[derive(Debug, Clone)]
pub struct Draft {
    pub vnum: i64,
    pub message: MessageId,
    /// Quoted preamble shown to a responder before the editor starts.
    pub quoted: Option<String>,
}

/// Which message bodies are currently owned by a live editor session.
/// `remove` refuses to free a body a session still references.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: HashSet<(i64, MessageId)>,
}

impl SessionRegistry {
    pub fn claim(&mut self, vnum: i64, message: MessageId) {
        self.active.insert((vnum, message));
    }

    pub fn release(&mut self, vnum: i64, message: MessageId) {
        self.active.remove(&(vnum, message));
    }

    pub fn is_active(&self, vnum: i64, message: MessageId) -> bool {
        self.active.contains(&(vnum, message))
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

pub struct BoardService {
    registry: BoardRegistry,
    objects: Box<dyn ObjectDirectory>,
    names: Box<dyn NameDirectory>,
    sessions: SessionRegistry,
}

impl BoardService {
    pub fn new(
        cfg: BoardConfig,
        objects: Box<dyn ObjectDirectory>,
        names: Box<dyn NameDirectory>,
    ) -> Self {
        Self {
            registry: BoardRegistry::new(cfg),
            objects,
            names,
            sessions: SessionRegistry::default(),
        }
    }

    /// Startup: create the board root and load everything under it.
    pub fn init(&mut self) -> anyhow::Result<()> {
        self.registry
            .init_all(self.objects.as_ref(), self.names.as_ref())
    }

    pub fn teardown(&mut self) {
        self.registry.teardown();
    }

    pub fn registry(&self) -> &BoardRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// The board index in the actor's preferred order, each entry tagged
    /// NEW until that actor has read it.
    pub fn show(&mut self, vnum: i64, actor: &Actor) -> Result<String, BoardError> {
        let board = self.registry.ensure(vnum, self.objects.as_ref());
        if actor.level < board.levels.read {
            return Err(BoardError::PermissionDenied);
        }

        let mut out = String::from(
            "This is a bulletin board.\r\n\
             Usage: READ/REMOVE <messg #>, RESPOND <messg #>, WRITE <header>.\r\n",
        );
        if board.store.is_empty() {
            out.push_str("The board is empty.\r\n");
            return Ok(out);
        }

        let n = board.store.len();
        out.push_str(&format!(
            "There {} {} {} on the board.\r\n",
            if n == 1 { "is" } else { "are" },
            n,
            if n == 1 { "message" } else { "messages" }
        ));

        let viewer = board.identity_for(actor);
        let msgs = board.store.as_slice();
        let ordered: Vec<&Message> = if actor.oldest_first {
            msgs.iter().rev().collect()
        } else {
            msgs.iter().collect()
        };
        for (pos, msg) in ordered.iter().enumerate() {
            let bucket = bucket_for(msg.timestamp, msg.poster.numeric_form(self.names.as_ref()));
            let seen = board.memory.is_read(bucket, &viewer, msg.timestamp);
            out.push_str(&format!(
                "[{}] ({:2}) : {} ({:<10}) :: {}\r\n",
                if seen { "---" } else { "NEW" },
                pos + 1,
                fmt_stamp(msg.timestamp),
                cap_first(&msg.poster.display_name(self.names.as_ref())),
                if msg.subject.is_empty() {
                    "No Subject"
                } else {
                    &msg.subject
                },
            ));
        }
        Ok(out)
    }

    /// Read one message by its 1-based index in the actor's listing order.
    /// The first read by this actor creates a read record and persists the
    /// board; later reads touch nothing.
    pub fn read_message(
        &mut self,
        vnum: i64,
        actor: &Actor,
        index: usize,
    ) -> Result<String, BoardError> {
        let cfg = self.registry.config().clone();
        let board = self.registry.ensure(vnum, self.objects.as_ref());
        if actor.level < board.levels.read {
            return Err(BoardError::PermissionDenied);
        }

        let slot = board
            .store
            .resolve(index, actor.oldest_first)
            .ok_or(BoardError::NotFound)?;
        let (timestamp, poster, subject, body) = {
            let msg = board.store.get(slot).ok_or(BoardError::NotFound)?;
            (
                msg.timestamp,
                msg.poster.clone(),
                msg.subject.clone(),
                msg.body.clone(),
            )
        };

        let bucket = bucket_for(timestamp, poster.numeric_form(self.names.as_ref()));
        let viewer = board.identity_for(actor);
        let inserted = board.memory.mark_read(bucket, &viewer, timestamp);

        let out = format!(
            "Message {} : {} ({}) :: {}\r\n\r\n{}\r\n",
            index,
            fmt_stamp(timestamp),
            cap_first(&poster.display_name(self.names.as_ref())),
            if subject.is_empty() {
                "No Subject"
            } else {
                &subject
            },
            match body.as_deref() {
                Some(text) => text,
                None => "Looks like this message is empty.",
            },
        );

        if inserted {
            file::persist(&cfg, board);
        }
        Ok(out)
    }

    /// Open a draft at the front of the board. Nothing is persisted until
    /// the editor session resolves via `finish_draft`.
    pub fn begin_write(
        &mut self,
        vnum: i64,
        actor: &Actor,
        subject: &str,
    ) -> Result<Draft, BoardError> {
        let max_subject = self.registry.config().max_subject_len;
        let id = self.registry.ids_mut().next_id();
        let board = self.registry.ensure(vnum, self.objects.as_ref());
        if actor.level < board.levels.write {
            return Err(BoardError::PermissionDenied);
        }

        let msg = Message {
            id,
            poster: board.identity_for(actor),
            timestamp: now_unix(),
            subject: normalize_subject(subject, max_subject),
            body: None,
        };
        board.store.push_front(msg);
        board.sync_count();
        self.sessions.claim(vnum, id);
        info!(vnum, "draft opened");
        Ok(Draft {
            vnum,
            message: id,
            quoted: None,
        })
    }

    /// Open a draft replying to an existing message. The target's body
    /// rides along as a quoted preamble for the editor to display.
    pub fn begin_respond(
        &mut self,
        vnum: i64,
        actor: &Actor,
        index: usize,
    ) -> Result<Draft, BoardError> {
        let max_subject = self.registry.config().max_subject_len;
        let id = self.registry.ids_mut().next_id();
        let board = self.registry.ensure(vnum, self.objects.as_ref());
        if actor.level < board.levels.write || actor.level < board.levels.read {
            return Err(BoardError::PermissionDenied);
        }

        let slot = board
            .store
            .resolve(index, actor.oldest_first)
            .ok_or(BoardError::NotFound)?;
        let (target_subject, target_body) = {
            let target = board.store.get(slot).ok_or(BoardError::NotFound)?;
            (target.subject.clone(), target.body.clone())
        };

        let msg = Message {
            id,
            poster: board.identity_for(actor),
            timestamp: now_unix(),
            subject: normalize_subject(&format!("Re: {target_subject}"), max_subject),
            body: None,
        };
        board.store.push_front(msg);
        board.sync_count();
        self.sessions.claim(vnum, id);
        info!(vnum, index, "response draft opened");

        let quoted = format!(
            "------- Quoted message -------\r\n{}\r\n------- End Quote -------\r\n",
            target_body.as_deref().unwrap_or(""),
        );
        Ok(Draft {
            vnum,
            message: id,
            quoted: Some(quoted),
        })
    }

    /// Resolve a draft: `Some(text)` stores the body, `None` means the
    /// session was abandoned and the message keeps an empty body. Either
    /// way the claim is released and the board persisted.
    pub fn finish_draft(&mut self, draft: &Draft, body: Option<String>) -> Result<(), BoardError> {
        let cfg = self.registry.config().clone();
        self.sessions.release(draft.vnum, draft.message);

        let board = self
            .registry
            .locate_mut(draft.vnum)
            .ok_or(BoardError::UnknownBoard(draft.vnum))?;
        let slot = board
            .store
            .slot_of(draft.message)
            .ok_or(BoardError::NotFound)?;

        let text = match body {
            Some(t) => sanitize_body(t, cfg.max_body_len),
            None => String::new(),
        };
        if let Some(msg) = board.store.get_mut(slot) {
            msg.body = Some(text);
        }
        board.sync_count();
        file::persist(&cfg, board);
        Ok(())
    }

    /// Remove a message by index. Posters can remove their own; anyone
    /// else needs the board's remove clearance. A message whose body a
    /// live editor session owns stays put.
    pub fn remove(&mut self, vnum: i64, actor: &Actor, index: usize) -> Result<(), BoardError> {
        let cfg = self.registry.config().clone();
        let board = self.registry.ensure(vnum, self.objects.as_ref());

        let slot = board
            .store
            .resolve(index, actor.oldest_first)
            .ok_or(BoardError::NotFound)?;
        let (id, poster) = {
            let msg = board.store.get(slot).ok_or(BoardError::NotFound)?;
            (msg.id, msg.poster.clone())
        };

        if board.identity_for(actor) != poster && actor.level < board.levels.remove {
            return Err(BoardError::PermissionDenied);
        }
        if self.sessions.is_active(vnum, id) {
            return Err(BoardError::EditConflict);
        }

        board.store.remove(slot);
        board.sync_count();
        file::persist(&cfg, board);
        info!(vnum, index, "message removed");
        Ok(())
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn fmt_stamp(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(t) => t.format("%a %b %d").to_string(),
        None => "???".to_string(),
    }
}

fn cap_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn normalize_subject(raw: &str, max: usize) -> String {
    // First line only; "$$" collapses like the old prompt escape did.
    let mut s = raw.lines().next().unwrap_or("").trim().replace("$$", "$");
    truncate_on_boundary(&mut s, max);
    if s.is_empty() {
        "No Subject".to_string()
    } else {
        s
    }
}

fn sanitize_body(mut text: String, max: usize) -> String {
    // '~' terminates a body block on disk, so it cannot ride along inside
    // one.
    if text.contains('~') {
        text = text.replace('~', "");
    }
    truncate_on_boundary(&mut text, max);
    text
}

fn truncate_on_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
