use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreResult;

/// Minimal identity record the booking core keeps for a guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customer {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

/// Customer-identity collaborator.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Customer>>;

    /// Returns the existing identity for `email`, creating a minimal one if absent.
    async fn find_or_create(&self, email: &str, name: Option<&str>) -> StoreResult<Customer>;
}

/// Emails are compared case-insensitively and without surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
