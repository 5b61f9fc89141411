use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Role tag carried on every user record.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// User record in the database.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub surname: String,
    pub birthday: Date,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String, // Argon2 PHC string, never leaves the service
    pub is_active: bool,
    pub is_verified: bool,
    pub last_login: Option<OffsetDateTime>,
    pub role: Role,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Insert payload: a user without an identity yet. The store assigns `id`.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub surname: String,
    pub birthday: Date,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub role: Role,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl NewUser {
    pub fn into_user(self, id: Uuid) -> User {
        User {
            id,
            first_name: self.first_name,
            surname: self.surname,
            birthday: self.birthday,
            email: self.email,
            phone: self.phone,
            password_hash: self.password_hash,
            is_active: self.is_active,
            is_verified: self.is_verified,
            last_login: None,
            role: self.role,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Raw `users` row; `role` is stored as TEXT.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub first_name: String,
    pub surname: String,
    pub birthday: Date,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub last_login: Option<OffsetDateTime>,
    pub role: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = String;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            first_name: r.first_name,
            surname: r.surname,
            birthday: r.birthday,
            email: r.email,
            phone: r.phone,
            password_hash: r.password_hash,
            is_active: r.is_active,
            is_verified: r.is_verified,
            last_login: r.last_login,
            role: r.role.parse()?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}
