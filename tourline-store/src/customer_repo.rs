use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use tourline_core::identity::{normalize_email, Customer, CustomerDirectory};
use tourline_core::StoreResult;

use crate::database::classify;

pub struct PgCustomerDirectory {
    pool: PgPool,
}

impl PgCustomerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    email: String,
    name: Option<String>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            email: row.email,
            name: row.name,
        }
    }
}

#[async_trait]
impl CustomerDirectory for PgCustomerDirectory {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Customer>> {
        let row = sqlx::query_as::<_, CustomerRow>("SELECT id, email, name FROM customers WHERE email = $1")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        Ok(row.map(Customer::from))
    }

    async fn find_or_create(&self, email: &str, name: Option<&str>) -> StoreResult<Customer> {
        // the no-op update makes RETURNING yield the existing row on conflict
        let row = sqlx::query_as::<_, CustomerRow>(
            r#"
            INSERT INTO customers (id, email, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET name = COALESCE(customers.name, EXCLUDED.name)
            RETURNING id, email, name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(normalize_email(email))
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        Ok(row.into())
    }
}
