use std::sync::Arc;

use crate::services::ServiceError;
use crate::storage::{Storage, StorageError};

/// Answers questions about a user's granted permission codes.
#[derive(Clone)]
pub struct PermissionService {
    storage: Arc<dyn Storage>,
}

impl PermissionService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn list_permissions(&self, user_id: i64) -> Result<Vec<String>, ServiceError> {
        self.require_user(user_id).await?;
        Ok(self.storage.user_permissions(user_id).await?)
    }

    /// An unknown `code` is [`ServiceError::InvalidInput`], not `false`.
    pub async fn has_permission(&self, user_id: i64, code: &str) -> Result<bool, ServiceError> {
        self.require_user(user_id).await?;
        match self.storage.user_has_permission(user_id, code).await {
            Ok(granted) => Ok(granted),
            Err(StorageError::PermissionNotFound) => Err(ServiceError::InvalidInput(format!(
                "unknown permission: {code}"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Passes when every code in `required` is granted; fails naming the missing ones.
    pub async fn validate_access(
        &self,
        user_id: i64,
        required: &[String],
    ) -> Result<(), ServiceError> {
        if required.is_empty() {
            return Ok(());
        }

        let granted = self.list_permissions(user_id).await?;
        let missing: Vec<String> = required
            .iter()
            .filter(|code| !granted.contains(code))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::MissingPermissions(missing))
        }
    }

    /// Idempotent: granting an already held permission succeeds.
    pub async fn grant(&self, user_id: i64, permission_id: i64) -> Result<(), ServiceError> {
        match self.storage.grant_permission(user_id, permission_id).await {
            Ok(()) => {
                tracing::info!(user_id, permission_id, "Permission granted");
                Ok(())
            }
            Err(StorageError::PermissionNotFound) => Err(ServiceError::InvalidInput(format!(
                "unknown permission id: {permission_id}"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn require_user(&self, user_id: i64) -> Result<(), ServiceError> {
        match self.storage.user_by_id(user_id).await {
            Ok(_) => Ok(()),
            Err(StorageError::UserNotFound) => Err(ServiceError::InvalidCredentials),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::storage::{InMemoryStorage, UserStore};

    async fn setup() -> Result<(Arc<InMemoryStorage>, PermissionService, i64), anyhow::Error> {
        let storage = Arc::new(InMemoryStorage::new());
        let user = storage
            .save_user_with_permission(
                NewUser {
                    email: "grace@example.com".to_string(),
                    password_hash: "hash".to_string(),
                    name: "Grace".to_string(),
                    phone: String::new(),
                    address: String::new(),
                },
                1,
            )
            .await?;
        let service = PermissionService::new(storage.clone());
        Ok((storage, service, user.id))
    }

    #[tokio::test]
    async fn test_list_permissions_includes_default_grant() -> Result<(), anyhow::Error> {
        let (_, service, user_id) = setup().await?;
        assert_eq!(service.list_permissions(user_id).await?, vec!["user"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_user_is_invalid_credentials() {
        let (_, service, _) = setup().await.unwrap();
        assert!(matches!(
            service.list_permissions(999).await,
            Err(ServiceError::InvalidCredentials)
        ));
        assert!(matches!(
            service.has_permission(999, "user").await,
            Err(ServiceError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_has_permission_rejects_unknown_code() -> Result<(), anyhow::Error> {
        let (_, service, user_id) = setup().await?;
        assert!(service.has_permission(user_id, "user").await?);
        assert!(!service.has_permission(user_id, "admin").await?);
        assert!(matches!(
            service.has_permission(user_id, "superuser").await,
            Err(ServiceError::InvalidInput(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_validate_access() -> Result<(), anyhow::Error> {
        let (_, service, user_id) = setup().await?;

        service.validate_access(user_id, &[]).await?;
        service.validate_access(user_id, &["user".to_string()]).await?;

        match service
            .validate_access(user_id, &["user".to_string(), "admin".to_string()])
            .await
        {
            Err(ServiceError::MissingPermissions(missing)) => assert_eq!(missing, vec!["admin"]),
            other => panic!("expected MissingPermissions, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_twice_leaves_one_association() -> Result<(), anyhow::Error> {
        let (storage, service, user_id) = setup().await?;

        service.grant(user_id, 2).await?;
        service.grant(user_id, 2).await?;

        assert_eq!(storage.grant_count(user_id).await, 2);
        assert!(service.has_permission(user_id, "admin").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_unknown_permission_id() -> Result<(), anyhow::Error> {
        let (_, service, user_id) = setup().await?;
        assert!(matches!(
            service.grant(user_id, 77).await,
            Err(ServiceError::InvalidInput(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_storage_fault_is_not_absence() -> Result<(), anyhow::Error> {
        let (storage, service, user_id) = setup().await?;
        storage.set_unavailable(true);
        assert!(matches!(
            service.list_permissions(user_id).await,
            Err(ServiceError::Storage(_))
        ));
        Ok(())
    }
}
