//! Role and team checks for ledger operations.
//!
//! Pure policy: no IO, no panics. The service resolves the actor and the
//! team that owns the target, then asks here before touching anything.

use thiserror::Error;

use crate::domain::{Actor, Role, TeamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewCards,
    ManageCards,
    UpdateBalances,
    CancelTransactions,
    ManageBuyers,
    ManageTeams,
    ManageUsers,
    ViewReports,
    AuditLedger,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewCards => "cards.view",
            Permission::ManageCards => "cards.manage",
            Permission::UpdateBalances => "cards.update_balance",
            Permission::CancelTransactions => "transactions.cancel",
            Permission::ManageBuyers => "buyers.manage",
            Permission::ManageTeams => "teams.manage",
            Permission::ManageUsers => "users.manage",
            Permission::ViewReports => "reports.view",
            Permission::AuditLedger => "ledger.audit",
        }
    }
}

const MANAGER_PERMISSIONS: &[Permission] = &[
    Permission::ViewCards,
    Permission::ManageCards,
    Permission::UpdateBalances,
    Permission::CancelTransactions,
    Permission::ManageBuyers,
    Permission::ViewReports,
];

const BUYER_PERMISSIONS: &[Permission] = &[
    Permission::ViewCards,
    Permission::UpdateBalances,
    Permission::ViewReports,
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("team mismatch")]
    TeamMismatch,

    #[error("missing permission '{0}'")]
    MissingPermission(&'static str),

    #[error("{0} account has no team")]
    NoTeam(Role),
}

fn granted(role: Role, required: Permission) -> bool {
    match role {
        Role::Admin => true,
        Role::Manager => MANAGER_PERMISSIONS.contains(&required),
        Role::Buyer => BUYER_PERMISSIONS.contains(&required),
    }
}

/// Check a permission that is not tied to a particular team.
pub fn authorize(actor: &Actor, required: Permission) -> Result<(), AuthzError> {
    if !granted(actor.role, required) {
        return Err(AuthzError::MissingPermission(required.as_str()));
    }
    if actor.role.requires_team() && actor.team_id.is_none() {
        return Err(AuthzError::NoTeam(actor.role));
    }
    Ok(())
}

/// Check a permission on something owned by `team_id`.
/// Admins act on every team; everyone else only on their own.
pub fn authorize_for_team(
    actor: &Actor,
    required: Permission,
    team_id: TeamId,
) -> Result<(), AuthzError> {
    authorize(actor, required)?;
    if actor.is_admin() || actor.team_id == Some(team_id) {
        Ok(())
    } else {
        Err(AuthzError::TeamMismatch)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn actor(role: Role, team_id: Option<TeamId>) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            role,
            team_id,
        }
    }

    #[test]
    fn test_admin_can_do_anything_anywhere() {
        let admin = actor(Role::Admin, None);
        let team = Uuid::new_v4();
        assert!(authorize_for_team(&admin, Permission::CancelTransactions, team).is_ok());
        assert!(authorize(&admin, Permission::AuditLedger).is_ok());
    }

    #[test]
    fn test_manager_is_confined_to_own_team() {
        let team = Uuid::new_v4();
        let manager = actor(Role::Manager, Some(team));

        assert!(authorize_for_team(&manager, Permission::CancelTransactions, team).is_ok());
        assert_eq!(
            authorize_for_team(&manager, Permission::ViewCards, Uuid::new_v4()),
            Err(AuthzError::TeamMismatch)
        );
        assert_eq!(
            authorize(&manager, Permission::ManageTeams),
            Err(AuthzError::MissingPermission("teams.manage"))
        );
    }

    #[test]
    fn test_buyer_cannot_cancel_or_manage() {
        let team = Uuid::new_v4();
        let buyer = actor(Role::Buyer, Some(team));

        assert!(authorize_for_team(&buyer, Permission::UpdateBalances, team).is_ok());
        assert!(authorize_for_team(&buyer, Permission::CancelTransactions, team).is_err());
        assert!(authorize_for_team(&buyer, Permission::ManageCards, team).is_err());
    }

    #[test]
    fn test_teamless_manager_is_rejected() {
        let manager = actor(Role::Manager, None);
        assert_eq!(
            authorize(&manager, Permission::ViewCards),
            Err(AuthzError::NoTeam(Role::Manager))
        );
    }
}
