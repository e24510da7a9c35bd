//! PostgreSQL implementation of the storage contract.

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use super::{
    AppStore, PermissionStore, RefreshTokenStore, ResetStore, Storage, StorageError, UserStore,
    VerificationStore,
};
use crate::models::app::AppRow;
use crate::models::{App, NewUser, RefreshToken, ResetToken, User, VerificationToken};
use crate::utils::token::hash_token;

const USER_COLUMNS: &str =
    "id, email, password_hash, name, phone, address, activated, created_utc, updated_utc";

#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

// ==================== User Operations ====================

#[async_trait]
impl UserStore for PostgresStorage {
    async fn save_user_with_permission(
        &self,
        user: NewUser,
        default_permission_id: i64,
    ) -> Result<User, StorageError> {
        const OP: &str = "storage.postgres.save_user_with_permission";

        let mut tx = self.pool.begin().await.map_err(StorageError::database(OP))?;

        let stored = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, password_hash, name, phone, address) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.address)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::UserExists
            } else {
                StorageError::Database {
                    context: OP,
                    source: e,
                }
            }
        })?;

        sqlx::query(
            "INSERT INTO user_permissions (user_id, permission_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(stored.id)
        .bind(default_permission_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                StorageError::PermissionNotFound
            } else {
                StorageError::Database {
                    context: OP,
                    source: e,
                }
            }
        })?;

        tx.commit().await.map_err(StorageError::database(OP))?;

        Ok(stored)
    }

    async fn user_by_email(&self, email: &str) -> Result<User, StorageError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::database("storage.postgres.user_by_email"))?
        .ok_or(StorageError::UserNotFound)
    }

    async fn user_by_id(&self, user_id: i64) -> Result<User, StorageError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::database("storage.postgres.user_by_id"))?
            .ok_or(StorageError::UserNotFound)
    }

    async fn update_password(
        &self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<(), StorageError> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_utc = NOW() WHERE id = $1")
                .bind(user_id)
                .bind(password_hash)
                .execute(&self.pool)
                .await
                .map_err(StorageError::database("storage.postgres.update_password"))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::UserNotFound);
        }
        Ok(())
    }
}

// ==================== App Operations ====================

#[async_trait]
impl AppStore for PostgresStorage {
    async fn app(&self, app_id: i32) -> Result<App, StorageError> {
        sqlx::query_as::<_, AppRow>("SELECT id, name, secret FROM apps WHERE id = $1")
            .bind(app_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::database("storage.postgres.app"))?
            .map(App::from)
            .ok_or(StorageError::AppNotFound)
    }
}

// ==================== Refresh Token Operations ====================

#[async_trait]
impl RefreshTokenStore for PostgresStorage {
    async fn save_refresh_token(&self, record: RefreshToken) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (token_hash, user_id, app_id, expires_utc, created_utc) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&record.token_hash)
        .bind(record.user_id)
        .bind(record.app_id)
        .bind(record.expires_utc)
        .bind(record.created_utc)
        .execute(&self.pool)
        .await
        .map_err(StorageError::database("storage.postgres.save_refresh_token"))?;
        Ok(())
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<(), StorageError> {
        let live: Option<bool> = sqlx::query_scalar(
            "DELETE FROM refresh_tokens WHERE token_hash = $1 RETURNING expires_utc > NOW()",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::database("storage.postgres.delete_refresh_token"))?;

        match live {
            Some(true) => Ok(()),
            _ => Err(StorageError::RefreshTokenNotFound),
        }
    }

    async fn refresh_token_exists(&self, token: &str) -> Result<bool, StorageError> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM refresh_tokens \
             WHERE token_hash = $1 AND expires_utc > NOW())",
        )
        .bind(hash_token(token))
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::database("storage.postgres.refresh_token_exists"))
    }

    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        new_record: RefreshToken,
    ) -> Result<(), StorageError> {
        const OP: &str = "storage.postgres.rotate_refresh_token";

        let mut tx = self.pool.begin().await.map_err(StorageError::database(OP))?;

        let deleted = sqlx::query(
            "DELETE FROM refresh_tokens WHERE token_hash = $1 AND expires_utc > NOW()",
        )
        .bind(hash_token(old_token))
        .execute(&mut *tx)
        .await
        .map_err(StorageError::database(OP))?;

        if deleted.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Err(StorageError::RefreshTokenNotFound);
        }

        sqlx::query(
            "INSERT INTO refresh_tokens (token_hash, user_id, app_id, expires_utc, created_utc) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&new_record.token_hash)
        .bind(new_record.user_id)
        .bind(new_record.app_id)
        .bind(new_record.expires_utc)
        .bind(new_record.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::database(OP))?;

        tx.commit().await.map_err(StorageError::database(OP))?;
        Ok(())
    }
}

// ==================== Permission Operations ====================

impl PostgresStorage {
    async fn permission_exists(&self, permission_id: i64) -> Result<bool, StorageError> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM permissions WHERE id = $1)")
            .bind(permission_id)
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::database("storage.postgres.permission_exists"))
    }
}

#[async_trait]
impl PermissionStore for PostgresStorage {
    async fn user_permissions(&self, user_id: i64) -> Result<Vec<String>, StorageError> {
        sqlx::query_scalar(
            "SELECT p.code FROM permissions p \
             JOIN user_permissions up ON up.permission_id = p.id \
             WHERE up.user_id = $1 ORDER BY p.code",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::database("storage.postgres.user_permissions"))
    }

    async fn user_has_permission(&self, user_id: i64, code: &str) -> Result<bool, StorageError> {
        const OP: &str = "storage.postgres.user_has_permission";

        let permission_id: i64 = sqlx::query_scalar("SELECT id FROM permissions WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::database(OP))?
            .ok_or(StorageError::PermissionNotFound)?;

        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_permissions \
             WHERE user_id = $1 AND permission_id = $2)",
        )
        .bind(user_id)
        .bind(permission_id)
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::database(OP))
    }

    async fn grant_permission(
        &self,
        user_id: i64,
        permission_id: i64,
    ) -> Result<(), StorageError> {
        if !self.permission_exists(permission_id).await? {
            return Err(StorageError::PermissionNotFound);
        }

        sqlx::query(
            "INSERT INTO user_permissions (user_id, permission_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                StorageError::UserNotFound
            } else {
                StorageError::Database {
                    context: "storage.postgres.grant_permission",
                    source: e,
                }
            }
        })?;
        Ok(())
    }
}

// ==================== Verification Token Operations ====================

#[async_trait]
impl VerificationStore for PostgresStorage {
    async fn save_verification_token(
        &self,
        record: VerificationToken,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO verification_tokens (token_hash, user_id, expires_utc) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE \
             SET token_hash = EXCLUDED.token_hash, expires_utc = EXCLUDED.expires_utc, \
                 created_utc = NOW()",
        )
        .bind(&record.token_hash)
        .bind(record.user_id)
        .bind(record.expires_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                StorageError::UserNotFound
            } else {
                StorageError::Database {
                    context: "storage.postgres.save_verification_token",
                    source: e,
                }
            }
        })?;
        Ok(())
    }

    async fn verification_token_for_user(
        &self,
        user_id: i64,
    ) -> Result<VerificationToken, StorageError> {
        sqlx::query_as::<_, VerificationToken>(
            "SELECT token_hash, user_id, expires_utc FROM verification_tokens \
             WHERE user_id = $1 AND expires_utc > NOW()",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::database(
            "storage.postgres.verification_token_for_user",
        ))?
        .ok_or(StorageError::TokenNotFound)
    }

    async fn consume_verification_token(&self, token: &str) -> Result<i64, StorageError> {
        const OP: &str = "storage.postgres.consume_verification_token";

        let mut tx = self.pool.begin().await.map_err(StorageError::database(OP))?;

        let user_id: i64 = sqlx::query_scalar(
            "DELETE FROM verification_tokens \
             WHERE token_hash = $1 AND expires_utc > NOW() RETURNING user_id",
        )
        .bind(hash_token(token))
        .fetch_optional(&mut *tx)
        .await
        .map_err(StorageError::database(OP))?
        .ok_or(StorageError::TokenNotFound)?;

        let updated =
            sqlx::query("UPDATE users SET activated = TRUE, updated_utc = NOW() WHERE id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(StorageError::database(OP))?;

        if updated.rows_affected() == 0 {
            return Err(StorageError::UserNotFound);
        }

        tx.commit().await.map_err(StorageError::database(OP))?;
        Ok(user_id)
    }
}

// ==================== Reset Token Operations ====================

#[async_trait]
impl ResetStore for PostgresStorage {
    async fn save_reset_token(&self, record: ResetToken) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO reset_tokens (token_hash, user_id, expires_utc, used_utc) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&record.token_hash)
        .bind(record.user_id)
        .bind(record.expires_utc)
        .bind(record.used_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                StorageError::UserNotFound
            } else {
                StorageError::Database {
                    context: "storage.postgres.save_reset_token",
                    source: e,
                }
            }
        })?;
        Ok(())
    }

    async fn reset_token_user(&self, token: &str) -> Result<i64, StorageError> {
        sqlx::query_scalar(
            "SELECT user_id FROM reset_tokens \
             WHERE token_hash = $1 AND used_utc IS NULL AND expires_utc > NOW()",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::database("storage.postgres.reset_token_user"))?
        .ok_or(StorageError::TokenNotFound)
    }

    async fn consume_reset_token(&self, token: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM reset_tokens WHERE token_hash = $1")
            .bind(hash_token(token))
            .execute(&self.pool)
            .await
            .map_err(StorageError::database("storage.postgres.consume_reset_token"))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TokenNotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn health_check(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StorageError::database("storage.postgres.health_check"))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
