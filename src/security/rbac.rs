//! Role-based access control.
//!
//! Six roles, each with a fixed default permission set and a rank in the role
//! hierarchy. Users may carry extra per-user grants on top of their role, and
//! resource owners always pass ownership checks.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::RbacConfig;
use crate::error::GuardError;
use crate::observability::metrics;

/// Application role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    ProjectManager,
    SiteManager,
    Finance,
    Procurement,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::ProjectManager,
        Role::SiteManager,
        Role::Finance,
        Role::Procurement,
        Role::Viewer,
    ];

    /// Rank in the hierarchy; higher outranks lower.
    pub fn level(&self) -> u8 {
        match self {
            Role::Admin => 100,
            Role::ProjectManager => 80,
            Role::SiteManager => 60,
            Role::Finance => 50,
            Role::Procurement => 40,
            Role::Viewer => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::ProjectManager => "project_manager",
            Role::SiteManager => "site_manager",
            Role::Finance => "finance",
            Role::Procurement => "procurement",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s.trim())
            .ok_or_else(|| GuardError::InvalidInput(format!("unknown role '{s}'")))
    }
}

/// An action a user may be permitted to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewDashboard,
    ViewProjects,
    CreateProject,
    EditProject,
    DeleteProject,
    ViewTasks,
    ManageTasks,
    ViewDocuments,
    UploadDocuments,
    DeleteDocuments,
    ViewFinances,
    ManageFinances,
    ViewPurchaseOrders,
    CreatePurchaseOrders,
    ApprovePurchaseOrders,
    ManageVendors,
    ViewReports,
    ExportReports,
    ManageUsers,
    ViewActivityLogs,
    ManageSettings,
}

impl Permission {
    pub const ALL: [Permission; 21] = [
        Permission::ViewDashboard,
        Permission::ViewProjects,
        Permission::CreateProject,
        Permission::EditProject,
        Permission::DeleteProject,
        Permission::ViewTasks,
        Permission::ManageTasks,
        Permission::ViewDocuments,
        Permission::UploadDocuments,
        Permission::DeleteDocuments,
        Permission::ViewFinances,
        Permission::ManageFinances,
        Permission::ViewPurchaseOrders,
        Permission::CreatePurchaseOrders,
        Permission::ApprovePurchaseOrders,
        Permission::ManageVendors,
        Permission::ViewReports,
        Permission::ExportReports,
        Permission::ManageUsers,
        Permission::ViewActivityLogs,
        Permission::ManageSettings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewDashboard => "view_dashboard",
            Permission::ViewProjects => "view_projects",
            Permission::CreateProject => "create_project",
            Permission::EditProject => "edit_project",
            Permission::DeleteProject => "delete_project",
            Permission::ViewTasks => "view_tasks",
            Permission::ManageTasks => "manage_tasks",
            Permission::ViewDocuments => "view_documents",
            Permission::UploadDocuments => "upload_documents",
            Permission::DeleteDocuments => "delete_documents",
            Permission::ViewFinances => "view_finances",
            Permission::ManageFinances => "manage_finances",
            Permission::ViewPurchaseOrders => "view_purchase_orders",
            Permission::CreatePurchaseOrders => "create_purchase_orders",
            Permission::ApprovePurchaseOrders => "approve_purchase_orders",
            Permission::ManageVendors => "manage_vendors",
            Permission::ViewReports => "view_reports",
            Permission::ExportReports => "export_reports",
            Permission::ManageUsers => "manage_users",
            Permission::ViewActivityLogs => "view_activity_logs",
            Permission::ManageSettings => "manage_settings",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| GuardError::InvalidInput(format!("unknown permission '{s}'")))
    }
}

use Permission::*;

const PROJECT_MANAGER_PERMISSIONS: &[Permission] = &[
    ViewDashboard,
    ViewProjects,
    CreateProject,
    EditProject,
    ViewTasks,
    ManageTasks,
    ViewDocuments,
    UploadDocuments,
    DeleteDocuments,
    ViewFinances,
    ViewPurchaseOrders,
    CreatePurchaseOrders,
    ApprovePurchaseOrders,
    ViewReports,
    ExportReports,
    ViewActivityLogs,
];

const SITE_MANAGER_PERMISSIONS: &[Permission] = &[
    ViewDashboard,
    ViewProjects,
    ViewTasks,
    ManageTasks,
    ViewDocuments,
    UploadDocuments,
    ViewPurchaseOrders,
    CreatePurchaseOrders,
    ViewReports,
];

const FINANCE_PERMISSIONS: &[Permission] = &[
    ViewDashboard,
    ViewProjects,
    ViewDocuments,
    ViewFinances,
    ManageFinances,
    ViewPurchaseOrders,
    ApprovePurchaseOrders,
    ViewReports,
    ExportReports,
];

const PROCUREMENT_PERMISSIONS: &[Permission] = &[
    ViewDashboard,
    ViewProjects,
    ViewDocuments,
    UploadDocuments,
    ViewPurchaseOrders,
    CreatePurchaseOrders,
    ManageVendors,
    ViewReports,
];

const VIEWER_PERMISSIONS: &[Permission] = &[
    ViewDashboard,
    ViewProjects,
    ViewTasks,
    ViewDocuments,
    ViewReports,
];

/// Built-in permission set for a role. Admin holds every permission.
pub fn default_permissions(role: Role) -> &'static [Permission] {
    match role {
        Role::Admin => &Permission::ALL,
        Role::ProjectManager => PROJECT_MANAGER_PERMISSIONS,
        Role::SiteManager => SITE_MANAGER_PERMISSIONS,
        Role::Finance => FINANCE_PERMISSIONS,
        Role::Procurement => PROCUREMENT_PERMISSIONS,
        Role::Viewer => VIEWER_PERMISSIONS,
    }
}

/// An authenticated user as seen by the policy checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    /// Per-user grants on top of the role's set.
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            permissions: Vec::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.extend(permissions);
        self
    }
}

/// Ownership and membership of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAccess {
    pub owner_id: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

/// Role → permission table, with optional configured extensions.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    roles: HashMap<Role, BTreeSet<Permission>>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        let roles = Role::ALL
            .into_iter()
            .map(|role| (role, default_permissions(role).iter().copied().collect()))
            .collect();
        Self { roles }
    }
}

impl AccessPolicy {
    /// Default table extended with the configured grants.
    ///
    /// Unknown role names are skipped; config validation reports them.
    pub fn from_config(config: &RbacConfig) -> Self {
        let mut policy = Self::default();
        for (name, grants) in &config.grants {
            if let Ok(role) = name.parse::<Role>() {
                policy.grant(role, grants.iter().copied());
            }
        }
        policy
    }

    /// Add permissions to a role.
    pub fn grant(&mut self, role: Role, permissions: impl IntoIterator<Item = Permission>) {
        self.roles.entry(role).or_default().extend(permissions);
    }

    /// Permissions held by a role.
    pub fn role_permissions(&self, role: Role) -> Vec<Permission> {
        self.roles
            .get(&role)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Effective permission set for a user, sorted.
    pub fn permissions_for(&self, user: &Principal) -> Vec<Permission> {
        let mut set: BTreeSet<Permission> = self
            .roles
            .get(&user.role)
            .cloned()
            .unwrap_or_default();
        set.extend(user.permissions.iter().copied());
        set.into_iter().collect()
    }

    pub fn has_permission(&self, user: &Principal, permission: Permission) -> bool {
        user.permissions.contains(&permission)
            || self
                .roles
                .get(&user.role)
                .is_some_and(|set| set.contains(&permission))
    }

    pub fn has_any_permission(&self, user: &Principal, permissions: &[Permission]) -> bool {
        permissions.iter().any(|p| self.has_permission(user, *p))
    }

    pub fn has_all_permissions(&self, user: &Principal, permissions: &[Permission]) -> bool {
        permissions.iter().all(|p| self.has_permission(user, *p))
    }

    pub fn has_minimum_role(&self, user: &Principal, minimum: Role) -> bool {
        user.role.level() >= minimum.level()
    }

    /// Owners always pass. Otherwise admins pass, and anyone with
    /// `view_projects` passes when they are a member or rank at least
    /// project manager.
    pub fn can_access_project(&self, user: &Principal, project: &ProjectAccess) -> bool {
        if user.id == project.owner_id || user.role == Role::Admin {
            return true;
        }
        if !self.has_permission(user, ViewProjects) {
            return false;
        }
        project.member_ids.iter().any(|id| *id == user.id)
            || self.has_minimum_role(user, Role::ProjectManager)
    }

    /// Owners may modify their own resources; others need the permission.
    pub fn can_modify_resource(&self, user: &Principal, owner_id: &str, permission: Permission) -> bool {
        user.id == owner_id || self.has_permission(user, permission)
    }

    /// Require an authenticated user holding `permission`.
    pub fn require_permission<'a>(
        &self,
        user: Option<&'a Principal>,
        permission: Permission,
    ) -> Result<&'a Principal, GuardError> {
        let user = require_authenticated(user)?;
        let allowed = self.has_permission(user, permission);
        metrics::record_authz_decision(allowed);
        if allowed {
            Ok(user)
        } else {
            tracing::warn!(user_id = %user.id, role = %user.role, permission = %permission, "Permission denied");
            Err(GuardError::Unauthorized(format!("missing permission '{permission}'")))
        }
    }

    /// Require an authenticated user ranked at least `minimum`.
    pub fn require_role<'a>(
        &self,
        user: Option<&'a Principal>,
        minimum: Role,
    ) -> Result<&'a Principal, GuardError> {
        let user = require_authenticated(user)?;
        let allowed = self.has_minimum_role(user, minimum);
        metrics::record_authz_decision(allowed);
        if allowed {
            Ok(user)
        } else {
            tracing::warn!(user_id = %user.id, role = %user.role, required = %minimum, "Role check failed");
            Err(GuardError::Unauthorized(format!("requires role '{minimum}' or higher")))
        }
    }
}

/// Fail with [`GuardError::Unauthenticated`] when no user is present.
pub fn require_authenticated(user: Option<&Principal>) -> Result<&Principal, GuardError> {
    user.ok_or(GuardError::Unauthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(owner: &str, members: &[&str]) -> ProjectAccess {
        ProjectAccess {
            owner_id: owner.to_string(),
            member_ids: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn test_admin_has_everything() {
        let policy = AccessPolicy::default();
        let admin = Principal::new("a1", Role::Admin);
        assert!(policy.has_all_permissions(&admin, &Permission::ALL));
    }

    #[test]
    fn test_role_defaults_and_overrides() {
        let policy = AccessPolicy::default();
        let viewer = Principal::new("v1", Role::Viewer);
        assert!(policy.has_permission(&viewer, ViewProjects));
        assert!(!policy.has_permission(&viewer, ExportReports));

        let viewer = viewer.with_permissions([ExportReports]);
        assert!(policy.has_permission(&viewer, ExportReports));
        assert!(!policy.has_permission(&viewer, ManageUsers));
    }

    #[test]
    fn test_any_and_all() {
        let policy = AccessPolicy::default();
        let finance = Principal::new("f1", Role::Finance);
        assert!(policy.has_any_permission(&finance, &[ManageUsers, ManageFinances]));
        assert!(!policy.has_all_permissions(&finance, &[ManageUsers, ManageFinances]));
        assert!(!policy.has_any_permission(&finance, &[]));
        assert!(policy.has_all_permissions(&finance, &[]));
    }

    #[test]
    fn test_hierarchy() {
        let policy = AccessPolicy::default();
        let site = Principal::new("s1", Role::SiteManager);
        assert!(policy.has_minimum_role(&site, Role::Finance));
        assert!(policy.has_minimum_role(&site, Role::SiteManager));
        assert!(!policy.has_minimum_role(&site, Role::ProjectManager));
    }

    #[test]
    fn test_owner_always_accesses_project() {
        let policy = AccessPolicy::default();
        // A user with no role permissions at all still owns the project.
        let mut stripped = AccessPolicy::default();
        stripped.roles.insert(Role::Viewer, BTreeSet::new());
        let owner = Principal::new("owner", Role::Viewer);

        assert!(policy.can_access_project(&owner, &project("owner", &[])));
        assert!(stripped.can_access_project(&owner, &project("owner", &[])));
    }

    #[test]
    fn test_project_access_rules() {
        let policy = AccessPolicy::default();
        let p = project("owner", &["member"]);

        assert!(policy.can_access_project(&Principal::new("root", Role::Admin), &p));
        assert!(policy.can_access_project(&Principal::new("member", Role::Viewer), &p));
        assert!(policy.can_access_project(&Principal::new("pm", Role::ProjectManager), &p));
        assert!(!policy.can_access_project(&Principal::new("outsider", Role::SiteManager), &p));
    }

    #[test]
    fn test_can_modify_resource() {
        let policy = AccessPolicy::default();
        let viewer = Principal::new("v1", Role::Viewer);
        assert!(policy.can_modify_resource(&viewer, "v1", DeleteDocuments));
        assert!(!policy.can_modify_resource(&viewer, "someone", DeleteDocuments));
        let pm = Principal::new("pm", Role::ProjectManager);
        assert!(policy.can_modify_resource(&pm, "someone", DeleteDocuments));
    }

    #[test]
    fn test_require_permission_errors() {
        let policy = AccessPolicy::default();
        let err = policy.require_permission(None, ViewDashboard).unwrap_err();
        assert_eq!(err.status_code(), 401);

        let viewer = Principal::new("v1", Role::Viewer);
        let err = policy.require_permission(Some(&viewer), ManageUsers).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.to_string(), "access denied: missing permission 'manage_users'");

        assert_eq!(policy.require_permission(Some(&viewer), ViewDashboard).unwrap().id, "v1");
    }

    #[test]
    fn test_require_role() {
        let policy = AccessPolicy::default();
        let finance = Principal::new("f1", Role::Finance);
        assert!(policy.require_role(Some(&finance), Role::Procurement).is_ok());
        let err = policy.require_role(Some(&finance), Role::Admin).unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_config_grants() {
        let mut config = RbacConfig::default();
        config.grants.insert("viewer".into(), vec![ExportReports]);
        config.grants.insert("ghost".into(), vec![ManageUsers]);
        let policy = AccessPolicy::from_config(&config);

        assert!(policy.role_permissions(Role::Viewer).contains(&ExportReports));
        assert!(!policy.role_permissions(Role::Viewer).contains(&ManageUsers));
    }

    #[test]
    fn test_permissions_for_merges_and_sorts() {
        let policy = AccessPolicy::default();
        let user = Principal::new("u", Role::Viewer).with_permissions([ManageSettings, ViewDashboard]);
        let perms = policy.permissions_for(&user);
        assert_eq!(perms.first(), Some(&ViewDashboard));
        assert_eq!(perms.last(), Some(&ManageSettings));
        assert_eq!(perms.len(), VIEWER_PERMISSIONS.len() + 1);
    }

    #[test]
    fn test_names_roundtrip_through_serde() {
        let user: Principal =
            serde_json::from_str(r#"{"id":"x","role":"project_manager","permissions":["manage_vendors"]}"#)
                .unwrap();
        assert_eq!(user.role, Role::ProjectManager);
        assert_eq!(user.permissions, vec![ManageVendors]);
        assert_eq!("site_manager".parse::<Role>().unwrap(), Role::SiteManager);
        assert!("janitor".parse::<Role>().is_err());
    }
}
