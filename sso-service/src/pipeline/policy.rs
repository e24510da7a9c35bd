use std::collections::{HashMap, HashSet};

use crate::models::{ADMIN, STAFF};

/// Fully qualified gRPC method paths.
pub mod methods {
    pub const REGISTER: &str = "/sso.v1.Auth/Register";
    pub const LOGIN: &str = "/sso.v1.Auth/Login";
    pub const LOGOUT: &str = "/sso.v1.Auth/Logout";
    pub const GET_USER_INFO: &str = "/sso.v1.Auth/GetUserInfo";
    pub const REFRESH_TOKEN: &str = "/sso.v1.Auth/RefreshToken";
    pub const FORGOT_PASSWORD: &str = "/sso.v1.Auth/ForgotPassword";
    pub const RESET_PASSWORD: &str = "/sso.v1.Auth/ResetPassword";
    pub const SEND_EMAIL_VERIFICATION: &str = "/sso.v1.Auth/SendEmailVerification";
    pub const EMAIL_VERIFY: &str = "/sso.v1.Auth/EmailVerify";
    pub const GET_USER_PERMISSIONS: &str = "/sso.v1.Permission/GetUserPermissions";
    pub const HAS_USER_PERMISSION: &str = "/sso.v1.Permission/HasUserPermission";
    pub const GRANT_PERMISSION: &str = "/sso.v1.Permission/GrantPermission";
}

/// Access rule for one method.
///
/// `required` codes must all be held; at least one of `one_of` must be held.
/// Either list being non-empty implies authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodPolicy {
    pub require_auth: bool,
    pub required: Vec<String>,
    pub one_of: Vec<String>,
}

impl MethodPolicy {
    /// Any caller with a valid access token.
    pub fn authenticated() -> Self {
        Self {
            require_auth: true,
            ..Self::default()
        }
    }

    pub fn required(codes: &[&str]) -> Self {
        Self {
            require_auth: true,
            required: codes.iter().map(|c| c.to_string()).collect(),
            one_of: Vec::new(),
        }
    }

    pub fn one_of(codes: &[&str]) -> Self {
        Self {
            require_auth: true,
            required: Vec::new(),
            one_of: codes.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn needs_auth(&self) -> bool {
        self.require_auth || !self.required.is_empty() || !self.one_of.is_empty()
    }
}

/// Per-method policies plus the methods excluded from audit logging.
///
/// Methods without an entry are public.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: HashMap<String, MethodPolicy>,
    sensitive: HashSet<String>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, method: impl Into<String>, policy: MethodPolicy) -> Self {
        self.policies.insert(method.into(), policy);
        self
    }

    pub fn with_sensitive(mut self, method: impl Into<String>) -> Self {
        self.sensitive.insert(method.into());
        self
    }

    pub fn policy(&self, method: &str) -> Option<&MethodPolicy> {
        self.policies.get(method)
    }

    pub fn is_sensitive(&self, method: &str) -> bool {
        self.sensitive.contains(method)
    }

    /// The deployed table for the `sso.v1` services.
    pub fn default_sso() -> Self {
        Self::new()
            .with_policy(methods::GET_USER_INFO, MethodPolicy::authenticated())
            .with_policy(methods::LOGOUT, MethodPolicy::authenticated())
            .with_policy(methods::SEND_EMAIL_VERIFICATION, MethodPolicy::authenticated())
            .with_policy(methods::GET_USER_PERMISSIONS, MethodPolicy::one_of(&[ADMIN, STAFF]))
            .with_policy(methods::HAS_USER_PERMISSION, MethodPolicy::one_of(&[ADMIN, STAFF]))
            .with_policy(methods::GRANT_PERMISSION, MethodPolicy::required(&[ADMIN]))
            .with_sensitive(methods::LOGIN)
            .with_sensitive(methods::REGISTER)
    }
}
