use chrono::NaiveDate;
use fundscout_core::error::AppError;
use fundscout_core::models::{CanonicalGrant, GrantStatus, UpsertOutcome};
use sqlx::{PgPool, Pool, Postgres};

/// Grant persistence in PostgreSQL, keyed by `(source, source_url)`.
#[derive(Clone)]
pub struct GrantRepository {
    pool: Pool<Postgres>,
}

impl GrantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new grant or overwrite the existing one for the same key.
    ///
    /// A row whose `content_hash` is unchanged is left untouched and still
    /// reported as [`UpsertOutcome::Updated`].
    pub async fn upsert(&self, grant: &CanonicalGrant) -> Result<UpsertOutcome, AppError> {
        let flags: Vec<String> = grant
            .quality_flags
            .iter()
            .map(|f| f.as_str().to_string())
            .collect();

        let row: Option<(bool,)> = sqlx::query_as(
            r#"
            INSERT INTO grants (
                title, description, source, source_url, min_amount, max_amount,
                open_date, deadline, contact_email, industry_focus, location,
                org_types_eligible, funding_purpose, audience_tags, status,
                quality_flags, content_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (source, source_url) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                min_amount = EXCLUDED.min_amount,
                max_amount = EXCLUDED.max_amount,
                open_date = EXCLUDED.open_date,
                deadline = EXCLUDED.deadline,
                contact_email = EXCLUDED.contact_email,
                industry_focus = EXCLUDED.industry_focus,
                location = EXCLUDED.location,
                org_types_eligible = EXCLUDED.org_types_eligible,
                funding_purpose = EXCLUDED.funding_purpose,
                audience_tags = EXCLUDED.audience_tags,
                status = EXCLUDED.status,
                quality_flags = EXCLUDED.quality_flags,
                content_hash = EXCLUDED.content_hash,
                updated_at = NOW()
            WHERE grants.content_hash IS DISTINCT FROM EXCLUDED.content_hash
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&grant.title)
        .bind(&grant.description)
        .bind(&grant.source)
        .bind(&grant.source_url)
        .bind(grant.min_amount)
        .bind(grant.max_amount)
        .bind(grant.open_date)
        .bind(grant.deadline)
        .bind(&grant.contact_email)
        .bind(&grant.industry_focus)
        .bind(&grant.location)
        .bind(grant.org_types_eligible.iter().cloned().collect::<Vec<String>>())
        .bind(grant.funding_purpose.iter().cloned().collect::<Vec<String>>())
        .bind(grant.audience_tags.iter().cloned().collect::<Vec<String>>())
        .bind(grant.status.as_str())
        .bind(flags)
        .bind(grant.content_hash())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let outcome = match row {
            Some((true,)) => UpsertOutcome::Added,
            Some((false,)) => UpsertOutcome::Updated,
            None => {
                tracing::trace!(source = %grant.source, url = %grant.source_url, "Grant unchanged");
                UpsertOutcome::Updated
            }
        };
        Ok(outcome)
    }

    /// Fetch the stored grant for one key.
    pub async fn get(
        &self,
        source: &str,
        source_url: &str,
    ) -> Result<Option<CanonicalGrant>, AppError> {
        let row = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT title, description, source, source_url, min_amount, max_amount,
                   open_date, deadline, contact_email, industry_focus, location,
                   org_types_eligible, funding_purpose, audience_tags, status, quality_flags
            FROM grants
            WHERE source = $1 AND source_url = $2
            "#,
        )
        .bind(source)
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    /// Number of grants stored for a source.
    pub async fn count_by_source(&self, source: &str) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM grants WHERE source = $1")
            .bind(source)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(count)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct GrantRow {
    title: String,
    description: String,
    source: String,
    source_url: String,
    min_amount: Option<i64>,
    max_amount: Option<i64>,
    open_date: Option<NaiveDate>,
    deadline: Option<NaiveDate>,
    contact_email: Option<String>,
    industry_focus: String,
    location: String,
    org_types_eligible: Vec<String>,
    funding_purpose: Vec<String>,
    audience_tags: Vec<String>,
    status: String,
    quality_flags: Vec<String>,
}

impl From<GrantRow> for CanonicalGrant {
    fn from(row: GrantRow) -> Self {
        CanonicalGrant {
            title: row.title,
            description: row.description,
            source: row.source,
            source_url: row.source_url,
            min_amount: row.min_amount,
            max_amount: row.max_amount,
            open_date: row.open_date,
            deadline: row.deadline,
            contact_email: row.contact_email,
            industry_focus: row.industry_focus,
            location: row.location,
            org_types_eligible: row.org_types_eligible.into_iter().collect(),
            funding_purpose: row.funding_purpose.into_iter().collect(),
            audience_tags: row.audience_tags.into_iter().collect(),
            status: row.status.parse().unwrap_or(GrantStatus::Open),
            quality_flags: row
                .quality_flags
                .iter()
                .filter_map(|f| f.parse().ok())
                .collect(),
        }
    }
}

// -- Trait implementation --

impl fundscout_core::traits::GrantStore for GrantRepository {
    async fn upsert_grant(&self, grant: &CanonicalGrant) -> Result<UpsertOutcome, AppError> {
        GrantRepository::upsert(self, grant).await
    }
}
