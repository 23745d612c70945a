mod repository;

pub use repository::*;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of account chosen at registration.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    /// Registers vehicles and books places.
    Driver,
    /// Operates parking lots.
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Driver => "driver",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "driver" => Ok(Role::Driver),
            "owner" => Ok(Role::Owner),
            _ => Err(()),
        }
    }
}

/// Account status.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_status", rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
}

/// Subscription level of a verified owner.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "account_mode")]
pub enum AccountMode {
    #[serde(rename = "BASIC")]
    #[sqlx(rename = "BASIC")]
    Basic,
}

/// User as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parking_photo_path: Option<String>,
    pub is_parking_verified: bool,
    #[sqlx(rename = "mode_compte")]
    pub account_mode: Option<AccountMode>,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_driver(&self) -> bool {
        self.role == Role::Driver
    }

    /// Owners may only manage parking lots once their photo was accepted.
    pub fn is_verified_owner(&self) -> bool {
        self.role == Role::Owner && self.is_parking_verified
    }
}

/// User about to be inserted.
#[derive(Clone, Debug, PartialEq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    /// PHC string.
    pub password: String,
    pub role: Role,
    pub parking_photo_path: Option<String>,
    pub is_parking_verified: bool,
    pub account_mode: Option<AccountMode>,
    pub status: Status,
}

impl NewUser {
    pub(crate) fn into_user(self, id: i64, created_at: DateTime<Utc>) -> User {
        User {
            id,
            name: self.name,
            email: self.email,
            password: self.password,
            role: self.role,
            parking_photo_path: self.parking_photo_path,
            is_parking_verified: self.is_parking_verified,
            account_mode: self.account_mode,
            status: self.status,
            created_at,
        }
    }
}
