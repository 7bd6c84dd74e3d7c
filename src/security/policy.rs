//! Caller Policy Definitions

use serde::{Deserialize, Serialize};

/// Role carried by the authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Owner,
    Supplier,
    Employee,
    Customer,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Owner => "owner",
            Role::Supplier => "supplier",
            Role::Employee => "employee",
            Role::Customer => "customer",
            Role::Other(name) => name,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "admin" => Role::Admin,
            "owner" => Role::Owner,
            "supplier" => Role::Supplier,
            "employee" => Role::Employee,
            "customer" => Role::Customer,
            other => Role::Other(other.to_string()),
        }
    }
}

/// Identity of whoever asked the question. Authentication happened upstream.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub role: Role,
    pub location_id: Option<i64>,
}

impl CallerContext {
    pub fn new(role: &str, location_id: Option<i64>) -> Self {
        Self {
            role: Role::parse(role),
            location_id,
        }
    }
}
