//! Classical permission-code RBAC.

use std::sync::Arc;

use async_trait::async_trait;

use super::{AccessRequest, AuthorizationStrategy, Subject, Verdict};
use crate::store::{PolicyRepository, StorageError};

/// Resolves `(resource, action)` to an enabled permission record and allows
/// when any role of the subject holds its code. Denies otherwise, including
/// when no enabled permission is bound to the endpoint.
pub struct RbacStrategy {
    policies: Arc<dyn PolicyRepository>,
}

impl RbacStrategy {
    pub fn new(policies: Arc<dyn PolicyRepository>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl AuthorizationStrategy for RbacStrategy {
    fn name(&self) -> &'static str {
        "rbac"
    }

    async fn evaluate(
        &self,
        subject: &Subject,
        request: &AccessRequest,
    ) -> Result<Verdict, StorageError> {
        let Some(permission) = self
            .policies
            .find_enabled_permission(&request.resource, &request.action)
            .await?
        else {
            return Ok(Verdict::Deny);
        };
        if subject.roles.is_empty() {
            return Ok(Verdict::Deny);
        }
        let held = self
            .policies
            .any_role_has_code(&subject.roles, &permission.code)
            .await?;
        Ok(if held { Verdict::Allow } else { Verdict::Deny })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::PermissionRecord;
    use crate::store::memory::MemoryStore;

    fn report_create(enabled: bool) -> PermissionRecord {
        PermissionRecord {
            id: 10,
            code: "report:create".into(),
            url: "/reports".into(),
            method: "POST".into(),
            enabled,
        }
    }

    #[tokio::test]
    async fn code_holder_is_allowed() {
        let store = Arc::new(MemoryStore::new());
        store.save_permission(&report_create(true)).await.unwrap();
        store.replace_role_permissions(3, &[10]).await.unwrap();
        let strategy = RbacStrategy::new(store);

        let request = AccessRequest::new("/reports", "post");
        assert_eq!(
            strategy
                .evaluate(&Subject::new(1, vec![3]), &request)
                .await
                .unwrap(),
            Verdict::Allow
        );
        assert_eq!(
            strategy
                .evaluate(&Subject::new(2, vec![4]), &request)
                .await
                .unwrap(),
            Verdict::Deny
        );
    }

    #[tokio::test]
    async fn disabled_or_unbound_endpoint_is_denied() {
        let store = Arc::new(MemoryStore::new());
        store.save_permission(&report_create(false)).await.unwrap();
        store.replace_role_permissions(3, &[10]).await.unwrap();
        let strategy = RbacStrategy::new(store);
        let subject = Subject::new(1, vec![3]);

        assert_eq!(
            strategy
                .evaluate(&subject, &AccessRequest::new("/reports", "POST"))
                .await
                .unwrap(),
            Verdict::Deny
        );
        assert_eq!(
            strategy
                .evaluate(&subject, &AccessRequest::new("/elsewhere", "GET"))
                .await
                .unwrap(),
            Verdict::Deny
        );
    }
}
