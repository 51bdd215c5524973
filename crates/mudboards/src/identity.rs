/// Lookup between player ids and names, backed by whatever player index
/// the host game keeps.
pub trait NameDirectory {
    fn id_by_name(&self, name: &str) -> Option<i64>;
    fn name_by_id(&self, id: i64) -> Option<String>;
}

/// A poster or reader reference as a board stores it: numeric id on legacy
/// boards, name on current ones. Equality dispatches on the tag, so an id
/// never compares equal to a name even when the directory maps one to the
/// other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Id(i64),
    Name(String),
}

impl Identity {
    /// Numeric form used by the read-record bucket hash. Names resolve
    /// through the directory; unknown names collapse to -1.
    pub fn numeric_form(&self, names: &dyn NameDirectory) -> i64 {
        match self {
            Identity::Id(n) => *n,
            Identity::Name(s) => names.id_by_name(s).unwrap_or(-1),
        }
    }

    pub fn display_name(&self, names: &dyn NameDirectory) -> String {
        match self {
            Identity::Id(n) => names
                .name_by_id(*n)
                .unwrap_or_else(|| "Unknown".to_string()),
            Identity::Name(s) => s.clone(),
        }
    }
}

/// The player acting on a board. Carries both halves of their identity so
/// either board version can encode them, plus their clearance and listing
/// preference.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: i64,
    pub name: String,
    pub level: i32,
    /// Reversed listing order: oldest message shown as #1.
    pub oldest_first: bool,
}
