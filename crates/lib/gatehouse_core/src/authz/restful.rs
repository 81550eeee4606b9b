//! RESTful path and method rules.

use std::sync::Arc;

use async_trait::async_trait;

use super::matcher::{MethodMatcher, path_matches};
use super::{AccessRequest, AuthorizationStrategy, Subject, Verdict};
use crate::store::{PolicyRepository, StorageError};

/// Allows a request when any role of the subject holds a matching rule.
/// Never denies on its own.
pub struct RestfulStrategy {
    policies: Arc<dyn PolicyRepository>,
    methods: MethodMatcher,
}

impl RestfulStrategy {
    pub fn new(policies: Arc<dyn PolicyRepository>) -> Self {
        Self {
            policies,
            methods: MethodMatcher::new(),
        }
    }
}

#[async_trait]
impl AuthorizationStrategy for RestfulStrategy {
    fn name(&self) -> &'static str {
        "restful"
    }

    async fn evaluate(
        &self,
        subject: &Subject,
        request: &AccessRequest,
    ) -> Result<Verdict, StorageError> {
        if subject.roles.is_empty() {
            return Ok(Verdict::NoOpinion);
        }
        let rules = self.policies.restful_rules_for_roles(&subject.roles).await?;
        let allowed = rules.iter().any(|rule| {
            path_matches(&rule.path, &request.resource)
                && self.methods.matches(&rule.method, &request.action)
        });
        Ok(if allowed {
            Verdict::Allow
        } else {
            Verdict::NoOpinion
        })
    }
}
