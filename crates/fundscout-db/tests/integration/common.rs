use std::collections::BTreeSet;

use fundscout_core::models::{CanonicalGrant, GrantStatus};
use fundscout_db::Database;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Spins up a PostgreSQL container, applies migrations and returns a pool.
///
/// Keep the `ContainerAsync` in scope for the whole test; dropping it stops
/// the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "fundscout_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string =
        format!("postgresql://postgres:postgres@{host}:{port}/fundscout_test");

    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    Database::from_pool(pool.clone())
        .migrate()
        .await
        .expect("Failed to run migrations");

    (pool, container)
}

pub fn sample_grant(source: &str, url: &str) -> CanonicalGrant {
    CanonicalGrant {
        title: "Regional Arts Fund".into(),
        description: "Grants of up to $50,000 for artists in regional Victoria.".into(),
        source: source.into(),
        source_url: url.into(),
        min_amount: None,
        max_amount: Some(50_000),
        open_date: None,
        deadline: chrono::NaiveDate::from_ymd_opt(2030, 12, 31),
        contact_email: Some("arts@example.gov.au".into()),
        industry_focus: "arts".into(),
        location: "VIC".into(),
        org_types_eligible: BTreeSet::from(["individual".to_string()]),
        funding_purpose: BTreeSet::from(["project".to_string()]),
        audience_tags: BTreeSet::from(["artists".to_string()]),
        status: GrantStatus::Open,
        quality_flags: BTreeSet::new(),
    }
}
