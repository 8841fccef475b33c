use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::messages;
use crate::models::{AppState, Role};

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
    pub session_token_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    user_id: Uuid,
    roles: i16,
}

impl AuthContext {
    /// Allow-list check shared by every handler.
    pub fn require(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            tracing::debug!(user_id = %self.user_id, role = self.role.as_str(), "role not allowed");
            Err(ApiError::forbidden())
        }
    }

    pub fn is(&self, role: Role) -> bool {
        self.role == role
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    /// Patient record linked to the calling account, if any.
    pub async fn linked_patient_id(&self, state: &AppState) -> Result<Option<Uuid>, ApiError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT patient_id
            FROM patient
            WHERE user_id = $1
              AND is_deleted = false
            "#,
        )
        .bind(self.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)
    }

    /// Linked patient record for a patient caller; a patient account without one can't act.
    pub async fn require_linked_patient(&self, state: &AppState) -> Result<Uuid, ApiError> {
        self.linked_patient_id(state)
            .await?
            .ok_or_else(|| ApiError::Forbidden("NO_PATIENT_PROFILE", messages::PATIENT_NOT_FOUND.into()))
    }

    /// Staff may read any patient's data; a patient only their own.
    pub async fn ensure_patient_access(&self, state: &AppState, patient_id: Uuid) -> Result<(), ApiError> {
        if self.is_staff() {
            return Ok(());
        }
        match self.linked_patient_id(state).await? {
            Some(own) if own == patient_id => Ok(()),
            _ => Err(ApiError::forbidden()),
        }
    }
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_access_token(authz.token());

            let row: SessionLookupRow = sqlx::query_as::<_, SessionLookupRow>(
                r#"
                SELECT st.session_token_id, st.user_id, u.roles
                FROM session_token st
                JOIN app_user u ON u.user_id = st.user_id
                WHERE st.session_token_hash = $1
                  AND st.revoked_at IS NULL
                  AND st.expires_at > now()
                  AND u.is_active = true
                "#,
            )
            .bind(&token_hash)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(ApiError::session_expired)?;

            let role = Role::from_i16(row.roles).ok_or_else(ApiError::forbidden)?;

            // best-effort
            if let Err(e) = sqlx::query(
                r#"
                UPDATE session_token
                SET last_seen_at = now()
                WHERE session_token_id = $1
                "#,
            )
            .bind(row.session_token_id)
            .execute(&state.db)
            .await
            {
                tracing::warn!(session = %row.session_token_id, "failed to touch last_seen_at: {e}");
            }

            Ok(AuthContext {
                user_id: row.user_id,
                role,
                session_token_id: row.session_token_id,
            })
        }
    }
}

#[cfg(test)]
pub(crate) fn test_auth(role: Role) -> AuthContext {
    AuthContext {
        user_id: Uuid::new_v4(),
        role,
        session_token_id: Uuid::new_v4(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_accepts_listed_roles_only() {
        let receptionist = test_auth(Role::Receptionist);
        assert!(receptionist.require(Role::FRONT_DESK).is_ok());
        assert!(receptionist.require(Role::MANAGERS).is_err());

        let patient = test_auth(Role::Patient);
        assert!(patient.require(Role::STAFF).is_err());
        assert!(patient.require(&[Role::Patient]).is_ok());
    }
}
