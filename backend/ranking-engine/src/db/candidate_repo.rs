/// Candidate and viewer-fact reads
///
/// Read-only access to the rows being ranked and to viewer-context facts.
/// Every lookup is a batch: one query per fact type across N candidates,
/// never one query per candidate. Results are keyed by id so the scoring
/// loop can treat a missing entry as neutral facts.
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    EngagementCounters, GeoPoint, ListingSummary, ListingType, ViewerContext,
};

/// Batch read access to the facts the scoring loop needs.
///
/// Implemented over Postgres by `CandidateRepository`; the facade only
/// depends on this trait so ranking is testable without a database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FactSource: Send + Sync {
    /// Facts about the requesting user. `None` viewer yields the anonymous
    /// context without touching the database.
    async fn viewer_context(
        &self,
        tenant_id: Uuid,
        viewer_id: Option<Uuid>,
    ) -> Result<ViewerContext>;

    /// Engagement counters for a batch of listings.
    async fn listing_engagement(
        &self,
        tenant_id: Uuid,
        listing_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, EngagementCounters>>;

    /// Engagement counters for a batch of members.
    async fn member_engagement(
        &self,
        tenant_id: Uuid,
        member_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, EngagementCounters>>;

    /// Coordinates of listing owners, for listings without their own.
    async fn owner_coordinates(
        &self,
        tenant_id: Uuid,
        owner_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, GeoPoint>>;

    /// Active listings of a batch of members, for the mutual-reciprocity
    /// check.
    async fn member_listings(
        &self,
        tenant_id: Uuid,
        member_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<ListingSummary>>>;
}

pub struct CandidateRepository {
    pool: PgPool,
}

impl CandidateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn viewer_coordinates(
        &self,
        tenant_id: Uuid,
        viewer_id: Uuid,
    ) -> Result<Option<GeoPoint>> {
        let row = sqlx::query_as::<_, (Option<f64>, Option<f64>)>(
            r#"
            SELECT latitude, longitude
            FROM users
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(viewer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(lat, lon)| GeoPoint::from_parts(lat, lon)))
    }

    async fn active_listings_for_owners(
        &self,
        tenant_id: Uuid,
        owner_ids: &[Uuid],
    ) -> Result<Vec<(Uuid, ListingSummary)>> {
        if owner_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, Option<i64>)>(
            r#"
            SELECT owner_id, id, listing_type, category_id
            FROM listings
            WHERE tenant_id = $1 AND owner_id = ANY($2)
              AND status = 'active' AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(owner_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut listings = Vec::with_capacity(rows.len());
        for (owner_id, id, raw_type, category_id) in rows {
            let Some(listing_type) = ListingType::parse(&raw_type) else {
                warn!(listing_id = %id, listing_type = %raw_type, "Unknown listing type, skipping");
                continue;
            };
            listings.push((
                owner_id,
                ListingSummary {
                    id,
                    listing_type,
                    category_id,
                },
            ));
        }
        Ok(listings)
    }

    async fn viewer_group_ids(&self, tenant_id: Uuid, viewer_id: Uuid) -> Result<HashSet<Uuid>> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            r#"
            SELECT group_id
            FROM group_members
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl FactSource for CandidateRepository {
    async fn viewer_context(
        &self,
        tenant_id: Uuid,
        viewer_id: Option<Uuid>,
    ) -> Result<ViewerContext> {
        let Some(viewer_id) = viewer_id else {
            return Ok(ViewerContext::anonymous());
        };

        let owner_ids = [viewer_id];
        let (coordinates, own_rows, group_ids) = tokio::join!(
            self.viewer_coordinates(tenant_id, viewer_id),
            self.active_listings_for_owners(tenant_id, &owner_ids),
            self.viewer_group_ids(tenant_id, viewer_id),
        );

        let own_listings: Vec<ListingSummary> =
            own_rows?.into_iter().map(|(_, summary)| summary).collect();
        let interest_categories = own_listings
            .iter()
            .filter_map(|own| own.category_id)
            .collect();

        let ctx = ViewerContext {
            viewer_id: Some(viewer_id),
            coordinates: coordinates?,
            interest_categories,
            own_listings,
            group_ids: group_ids?,
        };

        debug!(
            tenant_id = %tenant_id,
            viewer_id = %viewer_id,
            own_listings = ctx.own_listings.len(),
            groups = ctx.group_ids.len(),
            "Viewer context loaded"
        );
        Ok(ctx)
    }

    async fn listing_engagement(
        &self,
        tenant_id: Uuid,
        listing_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, EngagementCounters>> {
        if listing_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, (Uuid, i64, i64, i64)>(
            r#"
            SELECT listing_id, view_count, inquiry_count, save_count
            FROM listing_metrics
            WHERE tenant_id = $1 AND listing_id = ANY($2)
            "#,
        )
        .bind(tenant_id)
        .bind(listing_ids)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            tenant_id = %tenant_id,
            requested = listing_ids.len(),
            found = rows.len(),
            "Listing engagement batch loaded"
        );

        Ok(rows
            .into_iter()
            .map(|(id, views, inquiries, saves)| {
                (
                    id,
                    EngagementCounters::Listing {
                        views,
                        inquiries,
                        saves,
                    },
                )
            })
            .collect())
    }

    async fn member_engagement(
        &self,
        tenant_id: Uuid,
        member_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, EngagementCounters>> {
        if member_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, (Uuid, i64, i64, i64, i64)>(
            r#"
            SELECT user_id, login_count, post_count, comment_count, transaction_count
            FROM member_metrics
            WHERE tenant_id = $1 AND user_id = ANY($2)
            "#,
        )
        .bind(tenant_id)
        .bind(member_ids)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            tenant_id = %tenant_id,
            requested = member_ids.len(),
            found = rows.len(),
            "Member engagement batch loaded"
        );

        Ok(rows
            .into_iter()
            .map(|(id, logins, posts, comments, transactions)| {
                (
                    id,
                    EngagementCounters::Member {
                        logins,
                        posts,
                        comments,
                        transactions,
                    },
                )
            })
            .collect())
    }

    async fn owner_coordinates(
        &self,
        tenant_id: Uuid,
        owner_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, GeoPoint>> {
        if owner_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, (Uuid, Option<f64>, Option<f64>)>(
            r#"
            SELECT id, latitude, longitude
            FROM users
            WHERE tenant_id = $1 AND id = ANY($2) AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(owner_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, lat, lon)| GeoPoint::from_parts(lat, lon).map(|p| (id, p)))
            .collect())
    }

    async fn member_listings(
        &self,
        tenant_id: Uuid,
        member_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<ListingSummary>>> {
        let rows = self.active_listings_for_owners(tenant_id, member_ids).await?;

        let mut by_member: HashMap<Uuid, Vec<ListingSummary>> = HashMap::new();
        for (owner_id, summary) in rows {
            by_member.entry(owner_id).or_default().push(summary);
        }
        Ok(by_member)
    }
}
