//! Authenticated identity, roles and loan capabilities

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

/// User roles (`usuarios.rol_id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[repr(i32)]
pub enum Role {
    Admin = 1,
    Instructor = 2,
    Warehouse = 3,
}

impl TryFrom<i32> for Role {
    type Error = AppError;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Role::Admin),
            2 => Ok(Role::Instructor),
            3 => Ok(Role::Warehouse),
            other => Err(AppError::Authentication(format!("Unknown role {}", other))),
        }
    }
}

/// JWT Claims for authenticated users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub usr_cedula: i64,
    pub rol_id: i32,
    pub exp: i64,
    pub iat: i64,
}

impl UserClaims {
    /// Create a new JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse JWT token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    pub fn acting_user(&self) -> Result<ActingUser, AppError> {
        Ok(ActingUser {
            user_id: self.usr_cedula,
            role: Role::try_from(self.rol_id)?,
        })
    }
}

/// The user on whose behalf a lifecycle operation runs.
///
/// Every role rule of the loan lifecycle is answered here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingUser {
    pub user_id: i64,
    pub role: Role,
}

impl ActingUser {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn owns(&self, requester: i64) -> bool {
        self.user_id == requester
    }

    pub fn is_warehouse(&self) -> bool {
        self.role == Role::Warehouse
    }

    /// Only the warehouse may move end dates and statuses
    pub fn can_reschedule(&self) -> bool {
        self.is_warehouse()
    }

    fn oversees_loans(&self) -> bool {
        matches!(self.role, Role::Warehouse | Role::Admin)
    }

    pub fn require_list_all_loans(&self) -> Result<(), AppError> {
        if self.oversees_loans() {
            Ok(())
        } else {
            Err(AppError::Authorization("Only warehouse or admin users may list all loans".to_string()))
        }
    }

    /// Read a loan, or the loans of `requester`
    pub fn require_view(&self, requester: i64) -> Result<(), AppError> {
        if self.oversees_loans() || self.owns(requester) {
            Ok(())
        } else {
            Err(AppError::Authorization("You can only view your own loans".to_string()))
        }
    }

    /// Open a loan in the name of `requester`
    pub fn require_create_for(&self, requester: i64) -> Result<(), AppError> {
        if self.oversees_loans() || self.owns(requester) {
            Ok(())
        } else {
            Err(AppError::Authorization("You can only request loans for yourself".to_string()))
        }
    }

    /// Edit, transition or cancel a loan owned by `requester`
    pub fn require_modify(&self, requester: i64) -> Result<(), AppError> {
        if self.is_warehouse() || self.owns(requester) {
            Ok(())
        } else {
            Err(AppError::Authorization("You can only modify your own loans".to_string()))
        }
    }

    /// Hard-delete a loan owned by `requester`
    pub fn require_delete(&self, requester: i64) -> Result<(), AppError> {
        if self.oversees_loans() || self.owns(requester) {
            Ok(())
        } else {
            Err(AppError::Authorization("You can only delete your own loans".to_string()))
        }
    }
}
