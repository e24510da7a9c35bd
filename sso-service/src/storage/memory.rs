//! In-memory implementation of the storage contract.
//!
//! Used by the test suite and for running the service without Postgres.
//! A single async mutex guards all tables, so every method is atomic.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{
    AppStore, PermissionStore, RefreshTokenStore, ResetStore, Storage, StorageError, UserStore,
    VerificationStore,
};
use crate::models::{App, NewUser, RefreshToken, ResetToken, User, VerificationToken};
use crate::utils::token::hash_token;

#[derive(Default)]
struct Tables {
    next_user_id: i64,
    users: HashMap<i64, User>,
    apps: HashMap<i32, App>,
    permissions: HashMap<i64, String>,
    grants: BTreeSet<(i64, i64)>,
    refresh_tokens: HashMap<String, RefreshToken>,
    verification_tokens: HashMap<String, VerificationToken>,
    reset_tokens: HashMap<String, ResetToken>,
}

impl Tables {
    fn permission_id(&self, code: &str) -> Option<i64> {
        self.permissions
            .iter()
            .find(|(_, c)| c.as_str() == code)
            .map(|(id, _)| *id)
    }

    fn require_user(&self, user_id: i64) -> Result<&User, StorageError> {
        self.users.get(&user_id).ok_or(StorageError::UserNotFound)
    }
}

pub struct InMemoryStorage {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Empty store seeded with the `user` (1), `admin` (2) and `staff` (3) permissions.
    pub fn new() -> Self {
        let mut tables = Tables {
            next_user_id: 1,
            ..Default::default()
        };
        for (id, code) in [(1, "user"), (2, "admin"), (3, "staff")] {
            tables.permissions.insert(id, code.to_string());
        }

        Self {
            tables: Mutex::new(tables),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_app(mut self, app: App) -> Self {
        self.tables.get_mut().apps.insert(app.id, app);
        self
    }

    pub async fn insert_app(&self, app: App) {
        self.tables.lock().await.apps.insert(app.id, app);
    }

    pub async fn insert_permission(&self, id: i64, code: &str) {
        self.tables
            .lock()
            .await
            .permissions
            .insert(id, code.to_string());
    }

    /// Removes a grant; returns whether one existed.
    pub async fn revoke_permission(&self, user_id: i64, code: &str) -> bool {
        let mut tables = self.tables.lock().await;
        match tables.permission_id(code) {
            Some(permission_id) => tables.grants.remove(&(user_id, permission_id)),
            None => false,
        }
    }

    pub async fn grant_count(&self, user_id: i64) -> usize {
        self.tables
            .lock()
            .await
            .grants
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .count()
    }

    pub async fn refresh_token_count(&self, user_id: i64) -> usize {
        self.tables
            .lock()
            .await
            .refresh_tokens
            .values()
            .filter(|r| r.user_id == user_id)
            .count()
    }

    /// While set, every call fails the way a lost database connection would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    async fn tables(
        &self,
        context: &'static str,
    ) -> Result<tokio::sync::MutexGuard<'_, Tables>, StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Database {
                context,
                source: sqlx::Error::PoolClosed,
            });
        }
        Ok(self.tables.lock().await)
    }
}

#[async_trait]
impl UserStore for InMemoryStorage {
    async fn save_user_with_permission(
        &self,
        user: NewUser,
        default_permission_id: i64,
    ) -> Result<User, StorageError> {
        let mut tables = self.tables("storage.memory.save_user").await?;

        let email = user.email.to_lowercase();
        if tables.users.values().any(|u| u.email.to_lowercase() == email) {
            return Err(StorageError::UserExists);
        }
        if !tables.permissions.contains_key(&default_permission_id) {
            return Err(StorageError::PermissionNotFound);
        }

        let id = tables.next_user_id;
        tables.next_user_id += 1;

        let now = Utc::now();
        let stored = User {
            id,
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            phone: user.phone,
            address: user.address,
            activated: false,
            created_utc: now,
            updated_utc: now,
        };
        tables.users.insert(id, stored.clone());
        tables.grants.insert((id, default_permission_id));

        Ok(stored)
    }

    async fn user_by_email(&self, email: &str) -> Result<User, StorageError> {
        let tables = self.tables("storage.memory.user_by_email").await?;
        let email = email.to_lowercase();
        tables
            .users
            .values()
            .find(|u| u.email.to_lowercase() == email)
            .cloned()
            .ok_or(StorageError::UserNotFound)
    }

    async fn user_by_id(&self, user_id: i64) -> Result<User, StorageError> {
        let tables = self.tables("storage.memory.user_by_id").await?;
        tables.require_user(user_id).cloned()
    }

    async fn update_password(
        &self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables("storage.memory.update_password").await?;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(StorageError::UserNotFound)?;
        user.password_hash = password_hash.to_string();
        user.updated_utc = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl AppStore for InMemoryStorage {
    async fn app(&self, app_id: i32) -> Result<App, StorageError> {
        let tables = self.tables("storage.memory.app").await?;
        tables
            .apps
            .get(&app_id)
            .cloned()
            .ok_or(StorageError::AppNotFound)
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryStorage {
    async fn save_refresh_token(&self, record: RefreshToken) -> Result<(), StorageError> {
        let mut tables = self.tables("storage.memory.save_refresh_token").await?;
        tables
            .refresh_tokens
            .insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<(), StorageError> {
        let mut tables = self.tables("storage.memory.delete_refresh_token").await?;
        match tables.refresh_tokens.remove(&hash_token(token)) {
            Some(record) if !record.is_expired() => Ok(()),
            _ => Err(StorageError::RefreshTokenNotFound),
        }
    }

    async fn refresh_token_exists(&self, token: &str) -> Result<bool, StorageError> {
        let tables = self.tables("storage.memory.refresh_token_exists").await?;
        Ok(tables
            .refresh_tokens
            .get(&hash_token(token))
            .is_some_and(|record| !record.is_expired()))
    }

    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        new_record: RefreshToken,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables("storage.memory.rotate_refresh_token").await?;
        let old_hash = hash_token(old_token);

        let live = tables
            .refresh_tokens
            .get(&old_hash)
            .is_some_and(|record| !record.is_expired());
        if !live {
            return Err(StorageError::RefreshTokenNotFound);
        }

        tables.refresh_tokens.remove(&old_hash);
        tables
            .refresh_tokens
            .insert(new_record.token_hash.clone(), new_record);
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for InMemoryStorage {
    async fn user_permissions(&self, user_id: i64) -> Result<Vec<String>, StorageError> {
        let tables = self.tables("storage.memory.user_permissions").await?;
        let mut codes: Vec<String> = tables
            .grants
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .filter_map(|(_, pid)| tables.permissions.get(pid).cloned())
            .collect();
        codes.sort();
        Ok(codes)
    }

    async fn user_has_permission(&self, user_id: i64, code: &str) -> Result<bool, StorageError> {
        let tables = self.tables("storage.memory.user_has_permission").await?;
        let permission_id = tables
            .permission_id(code)
            .ok_or(StorageError::PermissionNotFound)?;
        Ok(tables.grants.contains(&(user_id, permission_id)))
    }

    async fn grant_permission(
        &self,
        user_id: i64,
        permission_id: i64,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables("storage.memory.grant_permission").await?;
        tables.require_user(user_id)?;
        if !tables.permissions.contains_key(&permission_id) {
            return Err(StorageError::PermissionNotFound);
        }
        tables.grants.insert((user_id, permission_id));
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for InMemoryStorage {
    async fn save_verification_token(
        &self,
        record: VerificationToken,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables("storage.memory.save_verification_token").await?;
        tables
            .verification_tokens
            .retain(|_, existing| existing.user_id != record.user_id);
        tables
            .verification_tokens
            .insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn verification_token_for_user(
        &self,
        user_id: i64,
    ) -> Result<VerificationToken, StorageError> {
        let tables = self
            .tables("storage.memory.verification_token_for_user")
            .await?;
        tables
            .verification_tokens
            .values()
            .find(|t| t.user_id == user_id && !t.is_expired())
            .cloned()
            .ok_or(StorageError::TokenNotFound)
    }

    async fn consume_verification_token(&self, token: &str) -> Result<i64, StorageError> {
        let mut tables = self
            .tables("storage.memory.consume_verification_token")
            .await?;
        let token_hash = hash_token(token);

        let user_id = match tables.verification_tokens.get(&token_hash) {
            Some(record) if !record.is_expired() => record.user_id,
            _ => return Err(StorageError::TokenNotFound),
        };

        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(StorageError::UserNotFound)?;
        user.activated = true;
        user.updated_utc = Utc::now();
        tables.verification_tokens.remove(&token_hash);

        Ok(user_id)
    }
}

#[async_trait]
impl ResetStore for InMemoryStorage {
    async fn save_reset_token(&self, record: ResetToken) -> Result<(), StorageError> {
        let mut tables = self.tables("storage.memory.save_reset_token").await?;
        tables.require_user(record.user_id)?;
        tables.reset_tokens.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn reset_token_user(&self, token: &str) -> Result<i64, StorageError> {
        let tables = self.tables("storage.memory.reset_token_user").await?;
        tables
            .reset_tokens
            .get(&hash_token(token))
            .filter(|record| record.is_valid())
            .map(|record| record.user_id)
            .ok_or(StorageError::TokenNotFound)
    }

    async fn consume_reset_token(&self, token: &str) -> Result<(), StorageError> {
        let mut tables = self.tables("storage.memory.consume_reset_token").await?;
        tables
            .reset_tokens
            .remove(&hash_token(token))
            .map(|_| ())
            .ok_or(StorageError::TokenNotFound)
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn health_check(&self) -> Result<(), StorageError> {
        self.tables("storage.memory.health_check").await.map(|_| ())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            name: "Test".to_string(),
            phone: String::new(),
            address: String::new(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_is_case_insensitive() {
        let store = InMemoryStorage::new();
        store
            .save_user_with_permission(new_user("a@example.com"), 1)
            .await
            .unwrap();

        let err = store
            .save_user_with_permission(new_user("A@Example.com"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UserExists));
    }

    #[tokio::test]
    async fn test_grant_is_idempotent() {
        let store = InMemoryStorage::new();
        let user = store
            .save_user_with_permission(new_user("a@example.com"), 1)
            .await
            .unwrap();

        store.grant_permission(user.id, 2).await.unwrap();
        store.grant_permission(user.id, 2).await.unwrap();

        assert_eq!(store.grant_count(user.id).await, 2);
        assert_eq!(
            store.user_permissions(user.id).await.unwrap(),
            vec!["admin".to_string(), "user".to_string()]
        );
    }

    #[tokio::test]
    async fn test_expired_refresh_token_is_absent() {
        let store = InMemoryStorage::new();
        store
            .save_refresh_token(RefreshToken::new("old", 1, 1, Duration::seconds(-5)))
            .await
            .unwrap();

        assert!(!store.refresh_token_exists("old").await.unwrap());
        assert!(matches!(
            store
                .rotate_refresh_token("old", RefreshToken::new("new", 1, 1, Duration::days(1)))
                .await,
            Err(StorageError::RefreshTokenNotFound)
        ));
        assert!(!store.refresh_token_exists("new").await.unwrap());
    }

    #[tokio::test]
    async fn test_verification_token_replaces_previous() {
        let store = InMemoryStorage::new();
        let user = store
            .save_user_with_permission(new_user("a@example.com"), 1)
            .await
            .unwrap();

        store
            .save_verification_token(VerificationToken::new("first", user.id))
            .await
            .unwrap();
        store
            .save_verification_token(VerificationToken::new("second", user.id))
            .await
            .unwrap();

        assert!(matches!(
            store.consume_verification_token("first").await,
            Err(StorageError::TokenNotFound)
        ));
        assert_eq!(
            store.consume_verification_token("second").await.unwrap(),
            user.id
        );
        assert!(store.user_by_id(user.id).await.unwrap().activated);
    }

    #[tokio::test]
    async fn test_unavailable_store_reports_fault() {
        let store = InMemoryStorage::new();
        store.set_unavailable(true);

        let err = store.user_by_id(1).await.unwrap_err();
        assert!(err.is_fault());
    }
}
