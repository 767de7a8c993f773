use std::collections::{HashMap, HashSet};
use std::fmt;

use prearc_types::SessionLocator;

use crate::error::{ServiceError, ServiceResult};

/// The user on whose behalf an operation runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Principal {
    pub name: String,
    pub is_admin: bool,
}

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_admin: false,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_admin: true,
        }
    }

    /// Identity used by unattended work (receivers, scheduled archiving).
    pub fn system() -> Self {
        Self::admin("system")
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// What a permission check is about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Project(String),
    StagingSession(SessionLocator),
    Subject { project: String, label: String },
    ArchivedSession { project: String, label: String },
}

impl Target {
    /// Owning project, if the target has one.
    pub fn project(&self) -> Option<&str> {
        match self {
            Self::Project(p) => Some(p),
            Self::StagingSession(loc) => Some(&loc.project),
            Self::Subject { project, .. } | Self::ArchivedSession { project, .. } => Some(project),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project(p) => write!(f, "project {p}"),
            Self::StagingSession(loc) => write!(f, "staging session {loc}"),
            Self::Subject { project, label } => write!(f, "subject {project}/{label}"),
            Self::ArchivedSession { project, label } => write!(f, "session {project}/{label}"),
        }
    }
}

/// Authorization checks consulted before every mutating step.
pub trait PermissionChecker: Send + Sync {
    fn can_read_project(&self, principal: &Principal, project: &str) -> ServiceResult<bool>;
    fn can_edit(&self, principal: &Principal, target: &Target) -> ServiceResult<bool>;
    fn can_create(&self, principal: &Principal, target: &Target) -> ServiceResult<bool>;
    fn can_delete(&self, principal: &Principal, target: &Target) -> ServiceResult<bool>;
}

/// Turn a negative answer into [`ServiceError::Forbidden`].
pub fn require(allowed: bool, principal: &Principal, action: &str, target: &Target) -> ServiceResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(ServiceError::Forbidden {
            principal: principal.name.clone(),
            action: format!("{action} {target}"),
        })
    }
}

/// Grants everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn can_read_project(&self, _principal: &Principal, _project: &str) -> ServiceResult<bool> {
        Ok(true)
    }

    fn can_edit(&self, _principal: &Principal, _target: &Target) -> ServiceResult<bool> {
        Ok(true)
    }

    fn can_create(&self, _principal: &Principal, _target: &Target) -> ServiceResult<bool> {
        Ok(true)
    }

    fn can_delete(&self, _principal: &Principal, _target: &Target) -> ServiceResult<bool> {
        Ok(true)
    }
}

/// Per-project membership: members may read and write a project's data,
/// admins may do anything. Targets without a project are admin-only.
#[derive(Clone, Debug, Default)]
pub struct ProjectMembership {
    members: HashMap<String, HashSet<String>>,
}

impl ProjectMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, user: &str, project: &str) -> Self {
        self.members
            .entry(project.to_string())
            .or_default()
            .insert(user.to_string());
        self
    }

    fn is_member(&self, principal: &Principal, project: Option<&str>) -> bool {
        principal.is_admin
            || project
                .and_then(|p| self.members.get(p))
                .is_some_and(|users| users.contains(&principal.name))
    }
}

impl PermissionChecker for ProjectMembership {
    fn can_read_project(&self, principal: &Principal, project: &str) -> ServiceResult<bool> {
        Ok(self.is_member(principal, Some(project)))
    }

    fn can_edit(&self, principal: &Principal, target: &Target) -> ServiceResult<bool> {
        Ok(self.is_member(principal, target.project()))
    }

    fn can_create(&self, principal: &Principal, target: &Target) -> ServiceResult<bool> {
        Ok(self.is_member(principal, target.project()))
    }

    fn can_delete(&self, principal: &Principal, target: &Target) -> ServiceResult<bool> {
        Ok(self.is_member(principal, target.project()))
    }
}
