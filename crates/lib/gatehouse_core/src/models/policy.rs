//! Authorization graph models.
//!
//! Roles reach resources two ways: through permission codes attached to a
//! permission record `(url, method)`, or through RESTful rules matching a
//! path pattern and an HTTP-method pattern.

use serde::{Deserialize, Serialize};

/// Subject key for a principal, e.g. `user:42`.
pub fn user_subject(principal_id: i64) -> String {
    format!("user:{principal_id}")
}

/// Subject key for a role, e.g. `role:7`.
pub fn role_subject(role_id: i64) -> String {
    format!("role:{role_id}")
}

/// A classical permission: a code bound to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub id: i64,
    /// Permission code, e.g. `report:create`.
    pub code: String,
    pub url: String,
    /// Upper-case HTTP method.
    pub method: String,
    pub enabled: bool,
}

/// A RESTful allow rule held by a role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RestfulRule {
    /// Path pattern; `*`, `:name` and `{name}` match exactly one segment.
    pub path: String,
    /// Method pattern: `*` or a regex over HTTP verbs such as `GET|POST`.
    pub method: String,
}

impl RestfulRule {
    pub fn new(path: &str, method: &str) -> Self {
        Self {
            path: path.to_string(),
            method: method.to_string(),
        }
    }
}

/// One edge of the policy graph, in `(subject, object, action)` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyEntry {
    PermissionCode { role_id: i64, code: String },
    Restful { role_id: i64, path: String, method: String },
}

impl PolicyEntry {
    pub fn subject(&self) -> String {
        match self {
            PolicyEntry::PermissionCode { role_id, .. } | PolicyEntry::Restful { role_id, .. } => {
                role_subject(*role_id)
            }
        }
    }

    pub fn object(&self) -> &str {
        match self {
            PolicyEntry::PermissionCode { code, .. } => code,
            PolicyEntry::Restful { path, .. } => path,
        }
    }

    pub fn action(&self) -> &str {
        match self {
            PolicyEntry::PermissionCode { .. } => "*",
            PolicyEntry::Restful { method, .. } => method,
        }
    }
}

/// Final authorization outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_entry_tuple_form() {
        let code = PolicyEntry::PermissionCode {
            role_id: 3,
            code: "report:create".into(),
        };
        assert_eq!(code.subject(), "role:3");
        assert_eq!(code.object(), "report:create");
        assert_eq!(code.action(), "*");

        let rest = PolicyEntry::Restful {
            role_id: 3,
            path: "/users/*".into(),
            method: "GET".into(),
        };
        assert_eq!(rest.object(), "/users/*");
        assert_eq!(rest.action(), "GET");
    }

    #[test]
    fn subject_keys() {
        assert_eq!(user_subject(42), "user:42");
        assert_eq!(role_subject(7), "role:7");
    }
}
