//! Scope Resolution
//! 
//! Derives what part of the data a caller may query from its role.

use crate::security::policy::{CallerContext, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionDescriptor {
    Unrestricted,
    ScopedToLocation(i64),
    GenericRestricted,
}

impl RestrictionDescriptor {
    /// Instruction appended to the translation prompt.
    pub fn prompt_clause(&self) -> String {
        match self {
            RestrictionDescriptor::Unrestricted => {
                "The caller is an administrator: every table may be queried.".to_string()
            }
            RestrictionDescriptor::ScopedToLocation(id) => format!(
                "The caller may only see data of location {id}. Every query that reads locations, \
users, inventory or orders MUST filter each of those tables on location {id} in the WHERE \
clause of every SELECT that reads it, including each UNION branch and subquery \
(locations.id = {id}, users.location_id = {id}, inventory.location_id = {id}, \
orders.origin_location_id = {id} OR orders.destination_location_id = {id})."
            ),
            RestrictionDescriptor::GenericRestricted => {
                "The caller has restricted access: never read the users table; \
prefer aggregated figures over row-level personal data."
                    .to_string()
            }
        }
    }
}

pub fn resolve_scope(caller: &CallerContext) -> RestrictionDescriptor {
    match (&caller.role, caller.location_id) {
        (Role::Admin, _) => RestrictionDescriptor::Unrestricted,
        (Role::Owner | Role::Supplier, Some(id)) => RestrictionDescriptor::ScopedToLocation(id),
        _ => RestrictionDescriptor::GenericRestricted,
    }
}
