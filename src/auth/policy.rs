//! Access policy table
//!
//! Every routed operation maps to exactly one access requirement here. The
//! HTTP layer looks the requirement up and runs the gate before dispatching,
//! so handlers never carry their own role lists.

use std::fmt;

use crate::auth::Role;
use crate::db::schemas::ResourceKind;

/// CRUD verb on a resource collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::List,
        Action::Get,
        Action::Create,
        Action::Update,
        Action::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::List => "list",
            Action::Get => "get",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, Action::Create | Action::Update | Action::Delete)
    }
}

/// Identifier of a routed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Health,
    Ready,
    Version,
    Login,
    Me,
    Refresh,
    DashboardStats,
    Resource(ResourceKind, Action),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Health => f.write_str("health"),
            Operation::Ready => f.write_str("ready"),
            Operation::Version => f.write_str("version"),
            Operation::Login => f.write_str("auth.login"),
            Operation::Me => f.write_str("auth.me"),
            Operation::Refresh => f.write_str("auth.refresh"),
            Operation::DashboardStats => f.write_str("dashboard.stats"),
            Operation::Resource(kind, action) => {
                write!(f, "{}.{}", kind.collection(), action.as_str())
            }
        }
    }
}

/// Requirement attached to an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No token needed
    Public,
    /// Any valid token
    Authenticated,
    /// Valid token whose role is in the set
    Roles(&'static [Role]),
}

const ADMINS: &[Role] = &[Role::SystemAdmin, Role::Admin];

const MANAGEMENT: &[Role] = &[Role::SystemAdmin, Role::Admin, Role::SalesManager];

const STAFF: &[Role] = &[Role::SystemAdmin, Role::Admin, Role::SalesManager, Role::Sales];

/// Get the access requirement for an operation
pub fn required_access(operation: Operation) -> Access {
    use ResourceKind::*;

    match operation {
        Operation::Health | Operation::Ready | Operation::Version | Operation::Login => {
            Access::Public
        }

        Operation::Me | Operation::Refresh => Access::Authenticated,

        Operation::DashboardStats => Access::Roles(MANAGEMENT),

        Operation::Resource(Users, _) => Access::Roles(ADMINS),

        // Catalog data is readable by every signed-in principal
        Operation::Resource(Products | Categories | Tags, Action::List | Action::Get) => {
            Access::Authenticated
        }
        Operation::Resource(Products | Categories | Tags, _) => Access::Roles(ADMINS),

        Operation::Resource(Customers | Purchases | FollowUps | HealthPlans, Action::Delete) => {
            Access::Roles(ADMINS)
        }
        Operation::Resource(Customers | Purchases | FollowUps | HealthPlans, _) => {
            Access::Roles(STAFF)
        }
    }
}

/// Whether a role may perform an operation at all
pub fn is_operation_allowed(operation: Operation, role: Role) -> bool {
    match required_access(operation) {
        Access::Public | Access::Authenticated => true,
        Access::Roles(roles) => roles.contains(&role),
    }
}
