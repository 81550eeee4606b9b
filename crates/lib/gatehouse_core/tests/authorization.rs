//! Authorization through the session layer and the engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatehouse_core::auth::password::hash_password_with_cost;
use gatehouse_core::clock::SystemClock;
use gatehouse_core::models::auth::Principal;
use gatehouse_core::models::policy::{PermissionRecord, PolicyEntry, RestfulRule};
use gatehouse_core::store::memory::MemoryStore;
use gatehouse_core::store::{PolicyRepository, StorageError};
use gatehouse_core::{
    AuthConfig, AuthError, AuthorizationEngine, AuthzError, Authenticator, LoginRequest, Outcome,
    Repositories,
};

const PASSWORD: &str = "hunter2hunter2";

async fn logged_in() -> (Authenticator, String) {
    let store = Arc::new(MemoryStore::new());
    let hash = hash_password_with_cost(PASSWORD, 4).unwrap();
    store.insert_principal(Principal::new(42, "dana", &hash, 3));

    let auth = Authenticator::new(
        AuthConfig::with_secret("authorization-test-secret-01234567"),
        Repositories::from_store(store),
        Arc::new(SystemClock),
    );
    let pair = auth
        .login(LoginRequest {
            username: "dana".into(),
            password: PASSWORD.into(),
            origin: "192.168.1.10".into(),
            remember_me: false,
        })
        .await
        .unwrap()
        .tokens;
    (auth, format!("Bearer {}", pair.access_token))
}

#[tokio::test]
async fn restful_rules_gate_requests() {
    let (auth, header) = logged_in().await;
    let engine = auth.engine();
    engine.sync_user_roles(42, &[3]).await.unwrap();
    engine
        .sync_role_restful_permissions(
            3,
            &[
                RestfulRule::new("/users/*", "GET"),
                RestfulRule::new("/users/:id/orders", "GET|POST"),
            ],
        )
        .await
        .unwrap();

    auth.authorize_request(Some(&header), "/users/123", "GET")
        .await
        .unwrap();
    auth.authorize_request(Some(&header), "/users/123/orders", "post")
        .await
        .unwrap();

    let err = auth
        .authorize_request(Some(&header), "/users/123/orders/9", "GET")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Forbidden));
    assert_eq!(err.outcome(), Outcome::Forbidden);
}

#[tokio::test]
async fn rbac_fallback_follows_permission_links() {
    let (auth, header) = logged_in().await;
    let engine = auth.engine();
    engine
        .save_permission(&PermissionRecord {
            id: 10,
            code: "report:create".into(),
            url: "/reports".into(),
            method: "POST".into(),
            enabled: true,
        })
        .await
        .unwrap();
    engine.sync_user_roles(42, &[3]).await.unwrap();
    engine.sync_role_permissions(3, &[10]).await.unwrap();

    auth.authorize_request(Some(&header), "/reports", "POST")
        .await
        .unwrap();
    assert_eq!(
        engine.policies_for_role(3).await.unwrap(),
        vec![PolicyEntry::PermissionCode {
            role_id: 3,
            code: "report:create".into()
        }]
    );

    engine.sync_role_permissions(3, &[]).await.unwrap();
    assert!(matches!(
        auth.authorize_request(Some(&header), "/reports", "POST").await,
        Err(AuthError::Forbidden)
    ));
}

#[tokio::test]
async fn principal_without_roles_is_denied() {
    let (auth, header) = logged_in().await;
    let engine = auth.engine();
    engine
        .sync_role_restful_permissions(3, &[RestfulRule::new("/users/*", "*")])
        .await
        .unwrap();
    engine.sync_user_roles(42, &[3]).await.unwrap();
    assert!(engine.is_allowed(42, "/users/1", "DELETE").await);

    engine.sync_user_roles(42, &[]).await.unwrap();
    assert!(!engine.is_allowed(42, "/users/1", "DELETE").await);
    assert!(matches!(
        auth.authorize_request(Some(&header), "/users/1", "DELETE").await,
        Err(AuthError::Forbidden)
    ));
}

#[tokio::test]
async fn unauthenticated_requests_never_reach_the_engine() {
    let (auth, _) = logged_in().await;
    let err = auth
        .authorize_request(Some("Bearer not-a-token"), "/users/1", "GET")
        .await
        .unwrap_err();
    assert_eq!(err.outcome(), Outcome::Unauthorized);
}

/// Policy store whose reads fail or hang.
struct BrokenPolicies {
    hang: bool,
}

impl BrokenPolicies {
    async fn fail<T>(&self) -> Result<T, StorageError> {
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Err(StorageError::Unavailable("policy store down".into()))
    }
}

#[async_trait]
impl PolicyRepository for BrokenPolicies {
    async fn roles_for_principal(&self, _principal_id: i64) -> Result<Vec<i64>, StorageError> {
        self.fail().await
    }

    async fn restful_rules_for_roles(
        &self,
        _role_ids: &[i64],
    ) -> Result<Vec<RestfulRule>, StorageError> {
        self.fail().await
    }

    async fn find_enabled_permission(
        &self,
        _url: &str,
        _method: &str,
    ) -> Result<Option<PermissionRecord>, StorageError> {
        self.fail().await
    }

    async fn any_role_has_code(
        &self,
        _role_ids: &[i64],
        _code: &str,
    ) -> Result<bool, StorageError> {
        self.fail().await
    }

    async fn policies_for_role(&self, _role_id: i64) -> Result<Vec<PolicyEntry>, StorageError> {
        self.fail().await
    }

    async fn save_permission(&self, _record: &PermissionRecord) -> Result<(), StorageError> {
        self.fail().await
    }

    async fn replace_user_roles(
        &self,
        _principal_id: i64,
        _role_ids: &[i64],
    ) -> Result<(), StorageError> {
        self.fail().await
    }

    async fn replace_role_permissions(
        &self,
        _role_id: i64,
        _permission_ids: &[i64],
    ) -> Result<(), StorageError> {
        self.fail().await
    }

    async fn replace_role_restful_rules(
        &self,
        _role_id: i64,
        _rules: &[RestfulRule],
    ) -> Result<(), StorageError> {
        self.fail().await
    }

    async fn delete_role(&self, _role_id: i64) -> Result<(), StorageError> {
        self.fail().await
    }

    async fn delete_permission(&self, _permission_id: i64) -> Result<bool, StorageError> {
        self.fail().await
    }
}

#[tokio::test]
async fn storage_failure_is_never_an_allow() {
    let engine =
        AuthorizationEngine::new(Arc::new(BrokenPolicies { hang: false }), Duration::from_secs(1));
    assert!(matches!(
        engine.authorize(42, "/users/1", "GET").await,
        Err(AuthzError::Storage(_))
    ));
    assert!(!engine.is_allowed(42, "/users/1", "GET").await);
    assert!(matches!(
        engine.sync_user_roles(42, &[1]).await,
        Err(AuthzError::Storage(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn hung_storage_is_indeterminate() {
    let engine = AuthorizationEngine::new(
        Arc::new(BrokenPolicies { hang: true }),
        Duration::from_millis(250),
    );
    let err = engine.authorize(42, "/users/1", "GET").await.unwrap_err();
    assert!(matches!(err, AuthzError::Indeterminate(_)));
    assert_eq!(AuthError::from(err).outcome(), Outcome::Unavailable);
}
