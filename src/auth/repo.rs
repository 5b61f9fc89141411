use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::repo_types::{NewUser, User, UserRow};
use super::store::{StoreError, UserStore};

const USER_COLUMNS: &str = r#"
    id, first_name, surname, birthday, email, phone, password_hash,
    is_active, is_verified, last_login, role, created_at, updated_at
"#;

const UNIQUE_VIOLATION: &str = "23505";

/// Postgres-backed [`UserStore`]. Email uniqueness is enforced by the
/// `users_email_key` constraint.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (first_name, surname, birthday, email, phone, password_hash,
                               is_active, is_verified, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&user.first_name)
            .bind(&user.surname)
            .bind(user.birthday)
            .bind(&user.email)
            .bind(&user.phone)
            .bind(&user.password_hash)
            .bind(user.is_active)
            .bind(user.is_verified)
            .bind(user.role.as_str())
            .bind(user.created_at)
            .bind(user.updated_at)
            .fetch_one(&self.db)
            .await
            .map_err(map_sqlx)?;
        debug!(user_id = %row.id, "user row inserted");
        into_user(row)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(map_sqlx)?;
        row.map(into_user).transpose()
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(map_sqlx)?;
        row.map(into_user).transpose()
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
               SET first_name = $1, surname = $2, birthday = $3, phone = $4, updated_at = $5
             WHERE id = $6
            "#,
        )
        .bind(&user.first_name)
        .bind(&user.surname)
        .bind(user.birthday)
        .bind(&user.phone)
        .bind(user.updated_at)
        .bind(user.id)
        .execute(&self.db)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_last_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), StoreError> {
        let result =
            sqlx::query(r#"UPDATE users SET last_login = $1, updated_at = $1 WHERE id = $2"#)
                .bind(at)
                .bind(id)
                .execute(&self.db)
                .await
                .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn into_user(row: UserRow) -> Result<User, StoreError> {
    User::try_from(row).map_err(StoreError::Database)
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::DuplicateEmail
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        _ => StoreError::Database(e.to_string()),
    }
}
