//! Per-request authorization predicate binding entities to their owning user.
//!
//! Applications and reminders carry their owner directly. Stages and documents
//! resolve it through exactly one parent hop (the owning application), which
//! the storage layer materializes on the fetched row. Companies and roles have
//! no per-user meaning and read as public.

use crate::types::{Application, Company, Reminder, Role, UserId};

/// Outcome of an ownership check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
}

impl Access {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// How an entity resolves to an owning principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The entity carries its owner on a direct field.
    Direct(UserId),
    /// The owner is resolved through the parent application.
    Transitive(UserId),
    /// Shared reference data with no per-user owner.
    Public,
}

/// Static dispatch from an entity to its ownership resolution.
pub trait HasOwner {
    fn ownership(&self) -> Ownership;
}

impl HasOwner for Application {
    fn ownership(&self) -> Ownership {
        Ownership::Direct(self.user_id)
    }
}

impl HasOwner for Reminder {
    fn ownership(&self) -> Ownership {
        Ownership::Direct(self.user_id)
    }
}

impl HasOwner for Company {
    fn ownership(&self) -> Ownership {
        Ownership::Public
    }
}

impl HasOwner for Role {
    fn ownership(&self) -> Ownership {
        Ownership::Public
    }
}

/// Pure predicate deciding whether `principal` may touch an entity.
pub fn check(ownership: Ownership, principal: UserId) -> Access {
    match ownership {
        Ownership::Direct(owner) | Ownership::Transitive(owner) => {
            if owner == principal {
                Access::Allow
            } else {
                Access::Deny
            }
        }
        Ownership::Public => Access::Allow,
    }
}

/// Convenience wrapper over [`check`] for types with a static resolution.
pub fn check_entity<T: HasOwner>(entity: &T, principal: UserId) -> Access {
    check(entity.ownership(), principal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reminder_owned_by(user_id: UserId) -> Reminder {
        Reminder {
            id: 1,
            user_id,
            application_id: None,
            due_at: Utc::now(),
            message: "follow up".to_string(),
            done: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn direct_owner_is_allowed_and_others_denied() {
        let reminder = reminder_owned_by(1);
        assert_eq!(check_entity(&reminder, 1), Access::Allow);
        assert_eq!(check_entity(&reminder, 2), Access::Deny);
    }

    #[test]
    fn transitive_owner_resolves_through_parent() {
        assert_eq!(check(Ownership::Transitive(7), 7), Access::Allow);
        assert_eq!(check(Ownership::Transitive(7), 8), Access::Deny);
    }

    #[test]
    fn public_entities_are_readable_by_any_principal() {
        let company = Company {
            id: 1,
            name: "Acme".to_string(),
            website: String::new(),
            country: String::new(),
            city: String::new(),
        };
        assert_eq!(check_entity(&company, 1), Access::Allow);
        assert_eq!(check_entity(&company, 999), Access::Allow);
    }
}
