pub mod app_config;
pub mod booking_repo;
pub mod cart_repo;
pub mod catalog_repo;
pub mod customer_repo;
pub mod database;
pub mod events;
pub mod memory;
pub mod processor_client;
pub mod redis_repo;
pub mod slot_repo;

pub use booking_repo::PgBookingRepository;
pub use cart_repo::PgCartRepository;
pub use catalog_repo::{PgBlackoutRegistry, PgPackageCatalog};
pub use customer_repo::PgCustomerDirectory;
pub use database::DbClient;
pub use events::{EventProducer, KafkaConfirmationMailer, KafkaEventSink};
pub use memory::InMemoryStore;
pub use processor_client::HttpPaymentProcessor;
pub use redis_repo::RedisClient;
pub use slot_repo::PgSlotRepository;
