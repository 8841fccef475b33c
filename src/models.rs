use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notifications::Notifier;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub notifier: Notifier,
}

/* -------------------------
   Roles
--------------------------*/

/// Single role per account, stored as smallint in app_user.roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum Role {
    Patient = 0,
    Admin = 1,
    Owner = 2,
    Dentist = 3,
    Receptionist = 4,
    Assistant = 5,
}

impl Role {
    pub const STAFF: &'static [Role] = &[
        Role::Admin,
        Role::Owner,
        Role::Dentist,
        Role::Receptionist,
        Role::Assistant,
    ];
    pub const MANAGERS: &'static [Role] = &[Role::Admin, Role::Owner];
    pub const FRONT_DESK: &'static [Role] = &[Role::Admin, Role::Owner, Role::Receptionist];

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Role::Patient),
            1 => Some(Role::Admin),
            2 => Some(Role::Owner),
            3 => Some(Role::Dentist),
            4 => Some(Role::Receptionist),
            5 => Some(Role::Assistant),
            _ => None,
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Admin => "admin",
            Role::Owner => "owner",
            Role::Dentist => "dentist",
            Role::Receptionist => "receptionist",
            Role::Assistant => "assistant",
        }
    }

    pub fn is_staff(self) -> bool {
        self != Role::Patient
    }
}

/// Cash or bank transfer, shared by invoices and financial transactions.
pub const PAYMENT_CASH: i16 = 0;
pub const PAYMENT_BANK_TRANSFER: i16 = 1;

pub fn is_known_payment_method(m: i16) -> bool {
    matches!(m, PAYMENT_CASH | PAYMENT_BANK_TRANSFER)
}

/* -------------------------
   Common response shapes
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

impl<T> ApiOk<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

impl OkData {
    pub fn ok() -> ApiOk<OkData> {
        ApiOk::new(OkData { ok: true })
    }
}

/* -------------------------
   Auth DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
    pub remember_me: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub user: UserProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: i16,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_smallint() {
        for v in 0..=5 {
            let role = Role::from_i16(v).unwrap();
            assert_eq!(role.as_i16(), v);
        }
        assert_eq!(Role::from_i16(6), None);
        assert_eq!(Role::from_i16(-1), None);
    }

    #[test]
    fn patient_is_not_staff() {
        assert!(!Role::Patient.is_staff());
        assert!(Role::STAFF.iter().all(|r| r.is_staff()));
    }
}
