use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use std::time::Duration;
use tourline_core::{StoreError, StoreResult};
use tracing::info;

/// Postgres error code for unique-constraint violations.
const UNIQUE_VIOLATION: &str = "23505";
const PAYMENT_ID_INDEX: &str = "bookings_payment_id_key";

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

/// Maps a driver error onto the store taxonomy.
pub fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Transient(err.to_string())
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            if db.constraint() == Some(PAYMENT_ID_INDEX) {
                StoreError::DuplicatePayment(db.message().to_string())
            } else {
                StoreError::Permanent(db.message().to_string())
            }
        }
        // serialization failure and deadlock are safe to replay
        sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) => {
            StoreError::Transient(db.message().to_string())
        }
        _ => StoreError::Permanent(err.to_string()),
    }
}

/// Parses a text column into one of the domain enums.
pub(crate) fn decode<T: FromStr<Err = String>>(value: &str) -> StoreResult<T> {
    T::from_str(value).map_err(|e| StoreError::Permanent(format!("corrupt column value: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_transient() {
        assert!(classify(sqlx::Error::PoolTimedOut).is_transient());
        assert!(classify(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert!(matches!(classify(sqlx::Error::RowNotFound), StoreError::NotFound(_)));
    }

    #[test]
    fn test_decode_rejects_unknown_values() {
        let status: StoreResult<tourline_core::BookingStatus> = decode("confirmed");
        assert_eq!(status.unwrap(), tourline_core::BookingStatus::Confirmed);
        let bad: StoreResult<tourline_core::BookingStatus> = decode("shipped");
        assert!(matches!(bad, Err(StoreError::Permanent(_))));
    }

    #[test]
    fn test_protocol_errors_are_permanent() {
        let err = classify(sqlx::Error::Protocol("unexpected message".into()));
        assert!(matches!(err, StoreError::Permanent(_)));
    }
}
