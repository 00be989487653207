pub mod app_config;
pub mod database;
pub mod fulfillment_repo;
pub mod notification_repo;
pub mod redis_repo;

pub use app_config::Config;
pub use database::DbClient;
pub use fulfillment_repo::PgFulfillmentRepository;
pub use notification_repo::PgNotificationRepository;
pub use redis_repo::RedisClient;
