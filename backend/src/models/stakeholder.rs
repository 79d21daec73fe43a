use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Read-only directory entry mapping a social handle to its organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Stakeholder {
    pub handle: String,
    pub organization: String,
    pub category: String,
    pub party: Option<String>,
}

impl Stakeholder {
    /// Member organizations of the umbrella get the smaller mention boost.
    pub fn is_member_organization(&self) -> bool {
        self.category == "member"
    }

    /// The umbrella organization itself.
    pub fn is_own_organization(&self) -> bool {
        self.category == "own"
    }
}
