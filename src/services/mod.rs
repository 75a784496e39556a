pub mod entity;
pub mod field;
pub mod room;

/// The session performing a mutation, and whether ownership is checked.
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    pub session_id: &'a str,
    pub enforce: bool,
}

impl<'a> Actor<'a> {
    #[must_use]
    pub fn new(session_id: &'a str, enforce: bool) -> Self {
        Self { session_id, enforce }
    }

    /// True when `owner` blocks this actor from writing.
    #[must_use]
    pub fn is_blocked_by(&self, owner: &str) -> bool {
        self.enforce && !owner.is_empty() && owner != self.session_id
    }
}
