//! Business logic services

pub mod loans;

use std::sync::Arc;

use crate::repository::Repository;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub loans: loans::LoansService,
    pub repository: Repository,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(repository: Repository) -> Self {
        Self {
            loans: loans::LoansService::new(Arc::new(repository.clone())),
            repository,
        }
    }
}
