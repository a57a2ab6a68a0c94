//! Users repository (display names for the audit trail)

use sqlx::{Pool, Postgres};

use crate::error::AppResult;

#[derive(Clone)]
pub struct UsersRepository {
    pool: Pool<Postgres>,
}

impl UsersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Full name of a user, `None` when the user is unknown or unnamed
    pub async fn display_name(&self, usr_cedula: i64) -> AppResult<Option<String>> {
        let name: Option<String> = sqlx::query_scalar(
            r#"
            SELECT TRIM(CONCAT(usr_nombre, ' ', usr_apellido))
            FROM usuarios
            WHERE usr_cedula = $1
            "#,
        )
        .bind(usr_cedula)
        .fetch_optional(&self.pool)
        .await?;

        Ok(name.filter(|n| !n.is_empty()))
    }
}
