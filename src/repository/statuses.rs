//! Status catalog repository

use sqlx::{Pool, Postgres};

use crate::{error::AppResult, models::status::Status};

#[derive(Clone)]
pub struct StatusesRepository {
    pool: Pool<Postgres>,
}

impl StatusesRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, est_id: i32) -> AppResult<Option<Status>> {
        let status = sqlx::query_as::<_, Status>(
            "SELECT est_id, est_nombre FROM estados WHERE est_id = $1",
        )
        .bind(est_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }
}
