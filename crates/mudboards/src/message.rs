use crate::identity::Identity;

/// Runtime-only handle for a message, stable for its lifetime and never
/// persisted. The editor-session registry keys on this instead of chasing
/// the message's storage slot around as neighbours are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub u64);

#[derive(Debug, Default)]
pub struct MessageIdGen(u64);

impl MessageIdGen {
    pub fn next_id(&mut self) -> MessageId {
        self.0 += 1;
        MessageId(self.0)
    }
}

/// One posted message. `body` is `None` while a draft session owns it.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub poster: Identity,
    pub timestamp: i64,
    pub subject: String,
    pub body: Option<String>,
}

/// Messages of one board, slot 0 newest. Removal volume is small enough
/// that a plain vector beats anything cleverer.
#[derive(Debug, Default)]
pub struct MessageStore {
    msgs: Vec<Message>,
}

impl MessageStore {
    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.msgs
    }

    /// New posts go in front.
    pub fn push_front(&mut self, msg: Message) {
        self.msgs.insert(0, msg);
    }

    /// Loader append: the file is already newest-first.
    pub fn push_loaded(&mut self, msg: Message) {
        self.msgs.push(msg);
    }

    /// Map a 1-based index in the viewer's listing order to a storage
    /// slot. `oldest_first` viewers count from the back.
    pub fn resolve(&self, index: usize, oldest_first: bool) -> Option<usize> {
        if index == 0 || index > self.msgs.len() {
            return None;
        }
        Some(if oldest_first {
            self.msgs.len() - index
        } else {
            index - 1
        })
    }

    pub fn get(&self, slot: usize) -> Option<&Message> {
        self.msgs.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Message> {
        self.msgs.get_mut(slot)
    }

    pub fn slot_of(&self, id: MessageId) -> Option<usize> {
        self.msgs.iter().position(|m| m.id == id)
    }

    pub fn remove(&mut self, slot: usize) -> Message {
        self.msgs.remove(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, MessageIdGen, MessageStore};
    use crate::identity::Identity;

    fn msg(ids: &mut MessageIdGen, subject: &str, ts: i64) -> Message {
        Message {
            id: ids.next_id(),
            poster: Identity::Name("Alice".to_string()),
            timestamp: ts,
            subject: subject.to_string(),
            body: Some(String::new()),
        }
    }

    #[test]
    fn resolve_both_view_orders() {
        let mut ids = MessageIdGen::default();
        let mut store = MessageStore::default();
        store.push_front(msg(&mut ids, "first", 1));
        store.push_front(msg(&mut ids, "second", 2));
        store.push_front(msg(&mut ids, "third", 3));

        // Newest-first: #1 is the latest post.
        assert_eq!(store.get(store.resolve(1, false).unwrap()).unwrap().subject, "third");
        assert_eq!(store.get(store.resolve(3, false).unwrap()).unwrap().subject, "first");

        // Reversed: #1 is the oldest.
        assert_eq!(store.get(store.resolve(1, true).unwrap()).unwrap().subject, "first");
        assert_eq!(store.get(store.resolve(3, true).unwrap()).unwrap().subject, "third");

        assert!(store.resolve(0, false).is_none());
        assert!(store.resolve(4, false).is_none());
        assert!(store.resolve(4, true).is_none());
    }
}
