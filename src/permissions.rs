//! Role-based authorization for institution-scoped actions.
//!
//! Every gate in the service funnels through [`can_act`] (role allow-lists)
//! or [`can_act_as_owner`] (ownership escape hatch). Both are pure predicates
//! over data the caller has already loaded; they never touch the store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    Superadmin,
    Admin,
    Director,
    Hr,
    Professor,
    Coordenador,
    Empresa,
    Candidate,
    Student,
}

impl RoleName {
    pub const ALL: [RoleName; 9] = [
        RoleName::Superadmin,
        RoleName::Admin,
        RoleName::Director,
        RoleName::Hr,
        RoleName::Professor,
        RoleName::Coordenador,
        RoleName::Empresa,
        RoleName::Candidate,
        RoleName::Student,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoleName::Superadmin => "superadmin",
            RoleName::Admin => "admin",
            RoleName::Director => "director",
            RoleName::Hr => "hr",
            RoleName::Professor => "professor",
            RoleName::Coordenador => "coordenador",
            RoleName::Empresa => "empresa",
            RoleName::Candidate => "candidate",
            RoleName::Student => "student",
        }
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role '{}'", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for RoleName {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        RoleName::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| UnknownRole(value.to_string()))
    }
}

/// One "user holds role X at institution Y" grant. `institution_id` is `None`
/// only for global grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub institution_id: Option<Uuid>,
    pub role: RoleName,
}

/// The authenticated caller as seen by authorization checks.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Uuid,
    pub assignments: Vec<RoleAssignment>,
    pub active_institution: Option<Uuid>,
}

impl Actor {
    pub fn is_superadmin(&self) -> bool {
        self.assignments
            .iter()
            .any(|assignment| assignment.role == RoleName::Superadmin)
    }

    pub fn roles_at(&self, institution_id: Uuid) -> impl Iterator<Item = RoleName> + '_ {
        self.assignments
            .iter()
            .filter(move |assignment| assignment.institution_id == Some(institution_id))
            .map(|assignment| assignment.role)
    }

    pub fn holds_any_role_at(&self, institution_id: Uuid) -> bool {
        self.roles_at(institution_id).next().is_some()
    }
}

/// Role-gated actions. Each maps to a fixed allow-list of role names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    UpdateApplicationStatus,
    ScheduleTrial,
    GradeTrial,
    ListInstitutionApplications,
    CreateJob,
    ManageInstitutionJobs,
}

const APPLICATION_MANAGERS: &[RoleName] = &[
    RoleName::Superadmin,
    RoleName::Admin,
    RoleName::Director,
    RoleName::Hr,
    RoleName::Professor,
    RoleName::Coordenador,
];

const TRIAL_SCHEDULERS: &[RoleName] = &[
    RoleName::Superadmin,
    RoleName::Admin,
    RoleName::Coordenador,
    RoleName::Director,
];

const INSTITUTION_ADMINS: &[RoleName] = &[
    RoleName::Superadmin,
    RoleName::Admin,
    RoleName::Director,
    RoleName::Hr,
    RoleName::Coordenador,
];

const JOB_AUTHORS: &[RoleName] = &[
    RoleName::Superadmin,
    RoleName::Admin,
    RoleName::Director,
    RoleName::Hr,
    RoleName::Professor,
    RoleName::Coordenador,
    RoleName::Empresa,
];

const JOB_MODERATORS: &[RoleName] = &[
    RoleName::Superadmin,
    RoleName::Admin,
    RoleName::Director,
    RoleName::Hr,
];

impl Action {
    pub fn allowed_roles(self) -> &'static [RoleName] {
        match self {
            Action::UpdateApplicationStatus => APPLICATION_MANAGERS,
            Action::ScheduleTrial | Action::GradeTrial => TRIAL_SCHEDULERS,
            Action::ListInstitutionApplications => INSTITUTION_ADMINS,
            Action::CreateJob => JOB_AUTHORS,
            Action::ManageInstitutionJobs => JOB_MODERATORS,
        }
    }

    pub fn allows(self, role: RoleName) -> bool {
        self.allowed_roles().contains(&role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NoActiveInstitution,
    RoleNotPermitted,
    InstitutionMismatch,
    NotOwner,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            DenyReason::NoActiveInstitution => "no active institution",
            DenyReason::RoleNotPermitted => "role not permitted for this action",
            DenyReason::InstitutionMismatch => "resource belongs to another institution",
            DenyReason::NotOwner => "only the owner may perform this action",
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Decide whether `actor` may perform `action` on a resource owned by
/// `resource_institution` (`None` for global resources).
pub fn can_act(actor: &Actor, action: Action, resource_institution: Option<Uuid>) -> Decision {
    if actor.is_superadmin() && action.allows(RoleName::Superadmin) {
        return Decision::Allow;
    }

    let Some(active) = actor.active_institution else {
        return Decision::Deny(DenyReason::NoActiveInstitution);
    };

    if !actor.roles_at(active).any(|role| action.allows(role)) {
        return Decision::Deny(DenyReason::RoleNotPermitted);
    }

    match resource_institution {
        None => Decision::Allow,
        Some(institution) if institution == active => Decision::Allow,
        Some(_) => Decision::Deny(DenyReason::InstitutionMismatch),
    }
}

/// Ownership escape hatch: bypasses allow-lists, requires `owner_id == actor`.
pub fn can_act_as_owner(actor: &Actor, owner_id: Uuid) -> Decision {
    if actor.user_id == owner_id {
        Decision::Allow
    } else {
        Decision::Deny(DenyReason::NotOwner)
    }
}
