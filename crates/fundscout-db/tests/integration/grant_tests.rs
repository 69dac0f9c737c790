use fundscout_core::models::{QualityFlag, UpsertOutcome};
use fundscout_core::traits::GrantStore;
use fundscout_db::GrantRepository;

use crate::integration::common::{sample_grant, setup_test_db};

#[tokio::test]
#[ignore = "requires Docker"]
async fn upsert_inserts_then_updates_same_key() {
    let (pool, _container) = setup_test_db().await;
    let repo = GrantRepository::new(pool);

    let mut grant = sample_grant("grants_gov_au", "https://www.grants.gov.au/Go/Show?id=1");
    assert_eq!(repo.upsert_grant(&grant).await.unwrap(), UpsertOutcome::Added);

    grant.max_amount = Some(75_000);
    grant.quality_flags.insert(QualityFlag::AmountRangeInverted);
    assert_eq!(repo.upsert_grant(&grant).await.unwrap(), UpsertOutcome::Updated);

    let stored = repo
        .get("grants_gov_au", "https://www.grants.gov.au/Go/Show?id=1")
        .await
        .unwrap()
        .expect("grant should be stored");
    assert_eq!(stored, grant);
    assert_eq!(repo.count_by_source("grants_gov_au").await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn unchanged_grant_counts_as_updated() {
    let (pool, _container) = setup_test_db().await;
    let repo = GrantRepository::new(pool);

    let grant = sample_grant("arts_gov_au", "https://www.arts.gov.au/funding/1");
    assert_eq!(repo.upsert(&grant).await.unwrap(), UpsertOutcome::Added);
    assert_eq!(repo.upsert(&grant).await.unwrap(), UpsertOutcome::Updated);
    assert_eq!(repo.count_by_source("arts_gov_au").await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn same_url_under_different_sources_is_two_grants() {
    let (pool, _container) = setup_test_db().await;
    let repo = GrantRepository::new(pool);

    let url = "https://www.vic.gov.au/grants/shared";
    repo.upsert(&sample_grant("vic_gov_grants", url)).await.unwrap();
    let outcome = repo
        .upsert(&sample_grant("business_gov_au", url))
        .await
        .unwrap();

    assert_eq!(outcome, UpsertOutcome::Added);
    assert!(repo.get("vic_gov_grants", url).await.unwrap().is_some());
    assert!(repo.get("business_gov_au", url).await.unwrap().is_some());
}
