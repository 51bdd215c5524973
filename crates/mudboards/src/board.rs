use crate::identity::{Actor, Identity};
use crate::memory::ReadIndex;
use crate::message::MessageStore;

/// Default clearance tier when no backing object says otherwise: staff
/// only.
pub const IMMORTAL_TIER: i32 = 31;

/// On-disk identity encoding. Anything but the current wire value parses
/// as legacy, matching the old loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// Numeric player ids in message and read-record lines.
    Legacy,
    /// Player names in message and read-record lines.
    Current,
}

impl Version {
    pub fn wire(self) -> i64 {
        match self {
            Version::Legacy => 1,
            Version::Current => 2,
        }
    }

    pub fn from_wire(v: i64) -> Self {
        if v == 2 {
            Version::Current
        } else {
            Version::Legacy
        }
    }
}

/// Clearance thresholds for the three board verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Levels {
    pub read: i32,
    pub write: i32,
    pub remove: i32,
}

impl Levels {
    pub const IMMORTAL_ONLY: Levels = Levels {
        read: IMMORTAL_TIER,
        write: IMMORTAL_TIER,
        remove: IMMORTAL_TIER,
    };
}

/// One loaded board. The declared count is what the control line claims;
/// the loader re-derives it from the store when the two disagree, and
/// every mutation keeps them in step.
#[derive(Debug)]
pub struct Board {
    pub vnum: i64,
    pub levels: Levels,
    pub declared_count: i64,
    pub version: Version,
    pub store: MessageStore,
    pub memory: ReadIndex,
}

impl Board {
    pub fn new(vnum: i64, levels: Levels, version: Version) -> Self {
        Self {
            vnum,
            levels,
            declared_count: 0,
            version,
            store: MessageStore::default(),
            memory: ReadIndex::new(),
        }
    }

    /// Encode an actor the way this board's version stores identities.
    /// The version is fixed at creation, so one board never mixes ids and
    /// names.
    pub fn identity_for(&self, actor: &Actor) -> Identity {
        match self.version {
            Version::Legacy => Identity::Id(actor.id),
            Version::Current => Identity::Name(actor.name.clone()),
        }
    }

    pub fn sync_count(&mut self) {
        self.declared_count = self.store.len() as i64;
    }
}
