//! Role enumeration and dominance relation
//!
//! Roles form a closed set with a precomputed dominance chain:
//! `Admin` ⊇ `Manager` ⊇ `Client` ⊇ `TeamMember`. A role implicitly holds
//! every role it dominates, so a route declared for `Client` stays reachable
//! by admins without enumerating senior roles. `Inactive` dominates nothing
//! and is never authorized.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    /// A business owner collecting reviews. The least-privileged role new
    /// accounts are provisioned with.
    #[serde(alias = "business_owner")]
    Client,
    TeamMember,
    Inactive,
}

impl Role {
    const fn mask(self) -> u8 {
        match self {
            Role::Admin => 1 << 0,
            Role::Manager => 1 << 1,
            Role::Client => 1 << 2,
            Role::TeamMember => 1 << 3,
            Role::Inactive => 1 << 4,
        }
    }

    /// Bitmask of every role this role holds, itself included.
    const fn holds(self) -> u8 {
        match self {
            Role::Admin => {
                Role::Admin.mask() | Role::Manager.mask() | Role::Client.mask()
                    | Role::TeamMember.mask()
            }
            Role::Manager => Role::Manager.mask() | Role::Client.mask() | Role::TeamMember.mask(),
            Role::Client => Role::Client.mask() | Role::TeamMember.mask(),
            Role::TeamMember => Role::TeamMember.mask(),
            Role::Inactive => 0,
        }
    }

    /// Whether this role holds `other` under the dominance relation.
    pub const fn dominates(self, other: Role) -> bool {
        self.holds() & other.mask() != 0
    }

    /// Whether the role is allowed to authenticate at all.
    pub const fn is_active(self) -> bool {
        !matches!(self, Role::Inactive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Client => "client",
            Role::TeamMember => "team_member",
            Role::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "client" | "business_owner" => Ok(Role::Client),
            "team_member" => Ok(Role::TeamMember),
            "inactive" => Ok(Role::Inactive),
            other => Err(crate::error::ValidationError::InvalidField(format!(
                "Unknown role: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominance_chain() {
        assert!(Role::Admin.dominates(Role::Manager));
        assert!(Role::Admin.dominates(Role::Client));
        assert!(Role::Admin.dominates(Role::TeamMember));
        assert!(Role::Manager.dominates(Role::Client));
        assert!(Role::Client.dominates(Role::TeamMember));

        assert!(!Role::Client.dominates(Role::Admin));
        assert!(!Role::TeamMember.dominates(Role::Client));
        assert!(!Role::Manager.dominates(Role::Admin));
    }

    #[test]
    fn every_active_role_dominates_itself() {
        for role in [Role::Admin, Role::Manager, Role::Client, Role::TeamMember] {
            assert!(role.dominates(role), "{role} must hold itself");
        }
    }

    #[test]
    fn inactive_dominates_nothing() {
        for role in [
            Role::Admin,
            Role::Manager,
            Role::Client,
            Role::TeamMember,
            Role::Inactive,
        ] {
            assert!(!Role::Inactive.dominates(role));
        }
        assert!(!Role::Inactive.is_active());
    }

    #[test]
    fn round_trips_through_strings() {
        for role in [Role::Admin, Role::Manager, Role::Client, Role::TeamMember] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        // Legacy alias used by pre-migration records
        assert_eq!("business_owner".parse::<Role>().unwrap(), Role::Client);
        assert!("superuser".parse::<Role>().is_err());
    }
}
