pub mod config;
pub mod database;
pub mod grant_repository;
pub mod run_log_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use grant_repository::GrantRepository;
pub use run_log_repository::RunLogRepository;
