//! End-to-end ranking flows against in-memory collaborators.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use ranking_engine::config::{ConfigResolver, RankingDomain, SettingsStore};
use ranking_engine::db::FactSource;
use ranking_engine::models::{
    Candidate, EngagementCounters, GeoPoint, Listing, ListingSummary, ListingType, RankOptions,
    ViewerContext,
};
use ranking_engine::services::query::ListingFilter;
use ranking_engine::{RankingError, RankingService, Result};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

struct StaticSettings {
    blob: Option<serde_json::Value>,
}

#[async_trait]
impl SettingsStore for StaticSettings {
    async fn ranking_overrides(
        &self,
        _tenant_id: Uuid,
        _domain: RankingDomain,
    ) -> Result<Option<serde_json::Value>> {
        Ok(self.blob.clone())
    }
}

struct StaticFacts {
    ctx: ViewerContext,
    engagement: HashMap<Uuid, EngagementCounters>,
}

impl StaticFacts {
    fn anonymous() -> Self {
        Self {
            ctx: ViewerContext::anonymous(),
            engagement: HashMap::new(),
        }
    }
}

#[async_trait]
impl FactSource for StaticFacts {
    async fn viewer_context(
        &self,
        _tenant_id: Uuid,
        _viewer_id: Option<Uuid>,
    ) -> Result<ViewerContext> {
        Ok(self.ctx.clone())
    }

    async fn listing_engagement(
        &self,
        _tenant_id: Uuid,
        _listing_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, EngagementCounters>> {
        Ok(self.engagement.clone())
    }

    async fn member_engagement(
        &self,
        _tenant_id: Uuid,
        _member_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, EngagementCounters>> {
        Ok(self.engagement.clone())
    }

    async fn owner_coordinates(
        &self,
        _tenant_id: Uuid,
        _owner_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, GeoPoint>> {
        Ok(HashMap::new())
    }

    async fn member_listings(
        &self,
        _tenant_id: Uuid,
        _member_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<ListingSummary>>> {
        Ok(HashMap::new())
    }
}

/// Stalls fact loading so deadline handling can be observed.
struct SlowFacts;

#[async_trait]
impl FactSource for SlowFacts {
    async fn viewer_context(
        &self,
        _tenant_id: Uuid,
        _viewer_id: Option<Uuid>,
    ) -> Result<ViewerContext> {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        Ok(ViewerContext::anonymous())
    }

    async fn listing_engagement(
        &self,
        _tenant_id: Uuid,
        _listing_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, EngagementCounters>> {
        Ok(HashMap::new())
    }

    async fn member_engagement(
        &self,
        _tenant_id: Uuid,
        _member_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, EngagementCounters>> {
        Ok(HashMap::new())
    }

    async fn owner_coordinates(
        &self,
        _tenant_id: Uuid,
        _owner_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, GeoPoint>> {
        Ok(HashMap::new())
    }

    async fn member_listings(
        &self,
        _tenant_id: Uuid,
        _member_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<ListingSummary>>> {
        Ok(HashMap::new())
    }
}

fn service_with(facts: impl FactSource + 'static, blob: Option<serde_json::Value>) -> RankingService {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ranking_engine=debug")
        .try_init();
    let resolver = Arc::new(ConfigResolver::new(Arc::new(StaticSettings { blob })));
    RankingService::new(resolver, Arc::new(facts))
}

fn request_listing(tenant_id: Uuid, category_id: i64) -> Listing {
    Listing {
        id: Uuid::new_v4(),
        tenant_id,
        owner_id: Uuid::new_v4(),
        listing_type: ListingType::Request,
        category_id: Some(category_id),
        title: "Looking for a tile cutter".to_string(),
        description: "Renovating the kitchen, need one for a weekend.".to_string(),
        coordinates: None,
        has_image: false,
        owner_verified: false,
        created_at: Utc::now(),
        updated_at: None,
    }
}

#[tokio::test]
async fn test_two_candidate_scenario_ranks_fresh_nearby_listing_first() -> anyhow::Result<()> {
    let tenant_id = Uuid::new_v4();
    let viewer_id = Uuid::new_v4();

    // Viewer at (0,0) with an active offer in category 5.
    let ctx = ViewerContext {
        viewer_id: Some(viewer_id),
        coordinates: GeoPoint::new(0.0, 0.0),
        interest_categories: [5].into_iter().collect(),
        own_listings: vec![ListingSummary {
            id: Uuid::new_v4(),
            listing_type: ListingType::Offer,
            category_id: Some(5),
        }],
        group_ids: Default::default(),
    };
    let service = service_with(
        StaticFacts {
            ctx,
            engagement: HashMap::new(),
        },
        None,
    );

    // A: request in category 5, created today, with image, ~2 km away.
    let mut a = request_listing(tenant_id, 5);
    a.coordinates = GeoPoint::new(0.018, 0.0);
    a.has_image = true;
    let a_id = a.id;

    // B: identical but 90 days old, no image, ~40 km away.
    let mut b = request_listing(tenant_id, 5);
    b.coordinates = GeoPoint::new(0.36, 0.0);
    b.created_at = Utc::now() - Duration::days(90);
    let b_id = b.id;

    let ranked = service
        .rank_listings(tenant_id, Some(viewer_id), vec![b, a], &RankOptions::default())
        .await?;

    assert_eq!(ranked[0].candidate.id(), a_id);
    assert_eq!(ranked[1].candidate.id(), b_id);

    let a_scores = &ranked[0].breakdown;
    let b_scores = &ranked[1].breakdown;

    // Both complete the viewer's offer in category 5.
    assert!(a_scores.reciprocity > 1.0);
    assert_eq!(a_scores.reciprocity, b_scores.reciprocity);

    assert_eq!(a_scores.freshness, 1.0);
    assert_eq!(a_scores.proximity, 1.0); // within the 25 km radius
    assert!(a_scores.quality > b_scores.quality); // image boost

    // 83 days past the full window with a 30-day half-life
    let expected_b_freshness = (-0.693_f64 * 83.0 / 30.0).exp();
    assert!((b_scores.freshness - expected_b_freshness.max(0.05)).abs() < 1e-6);
    assert!(b_scores.proximity < 1.0);

    assert!(ranked[0].score() > ranked[1].score());
    Ok(())
}

#[tokio::test]
async fn test_repeated_ranking_is_deterministic() {
    let tenant_id = Uuid::new_v4();
    let service = service_with(StaticFacts::anonymous(), None);

    // Same creation instant, so scores and tiebreakers are all equal.
    let created = Utc::now();
    let rows: Vec<Listing> = (0..8)
        .map(|_| {
            let mut l = request_listing(tenant_id, 1);
            l.created_at = created;
            l
        })
        .collect();

    let first = service
        .rank_listings(tenant_id, None, rows.clone(), &RankOptions::default())
        .await
        .unwrap();
    let second = service
        .rank_listings(tenant_id, None, rows, &RankOptions::default())
        .await
        .unwrap();

    let first_ids: Vec<Uuid> = first.iter().map(|r| r.candidate.id()).collect();
    let second_ids: Vec<Uuid> = second.iter().map(|r| r.candidate.id()).collect();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn test_absent_engagement_matches_sql_neutral_placeholder() {
    let tenant_id = Uuid::new_v4();
    let service = service_with(StaticFacts::anonymous(), None);

    let ranked = service
        .rank_listings(
            tenant_id,
            None,
            vec![request_listing(tenant_id, 1)],
            &RankOptions::default(),
        )
        .await
        .unwrap();
    // In-process neutral value for absent counters...
    assert_eq!(ranked[0].breakdown.engagement, 1.0);

    // ...and the SQL path multiplies the same literal.
    let query = service
        .build_listing_query(tenant_id, None, &ListingFilter::default())
        .await;
    assert!(query.sql.contains("* 1.0)"));
}

#[tokio::test]
async fn test_disabled_tenant_gets_identity_passthrough() {
    let tenant_id = Uuid::new_v4();
    let service = service_with(
        StaticFacts::anonymous(),
        Some(serde_json::json!({ "enabled": false })),
    );

    let rows: Vec<Listing> = (0..4)
        .map(|age| {
            let mut l = request_listing(tenant_id, 1);
            l.created_at = Utc::now() - Duration::days(age * 100);
            l
        })
        .collect();
    let expected: Vec<Uuid> = rows.iter().map(|l| l.id).collect();

    let ranked = service
        .rank_listings(tenant_id, None, rows, &RankOptions::default())
        .await
        .unwrap();

    let got: Vec<Uuid> = ranked.iter().map(|r| r.candidate.id()).collect();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn test_expired_deadline_is_a_hard_error() {
    let tenant_id = Uuid::new_v4();
    let service = service_with(SlowFacts, None);

    let opts = RankOptions {
        deadline: Some(std::time::Instant::now() + std::time::Duration::from_millis(10)),
        ..Default::default()
    };
    let result = service
        .rank_listings(tenant_id, None, vec![request_listing(tenant_id, 1)], &opts)
        .await;

    assert!(matches!(result, Err(RankingError::DeadlineExceeded)));
}

#[tokio::test]
async fn test_member_ranking_prefers_active_verified_members() {
    let tenant_id = Uuid::new_v4();

    let make_member = |days_idle: i64, verified: bool| ranking_engine::models::Member {
        id: Uuid::new_v4(),
        tenant_id,
        display_name: "Robin".to_string(),
        bio: String::new(),
        coordinates: None,
        has_avatar: false,
        verified,
        listing_count: 0,
        group_count: 0,
        created_at: Utc::now() - Duration::days(400),
        last_active_at: Some(Utc::now() - Duration::days(days_idle)),
    };

    let dormant = make_member(300, false);
    let active = make_member(0, true);
    let active_id = active.id;

    let service = service_with(StaticFacts::anonymous(), None);
    let ranked = service
        .rank_members(tenant_id, None, vec![dormant, active], &RankOptions::default())
        .await
        .unwrap();

    assert_eq!(ranked[0].candidate.id(), active_id);
    match &ranked[0].candidate {
        Candidate::Member(m) => assert!(m.verified),
        Candidate::Listing(_) => panic!("expected a member"),
    }
}
