/// Ranking orchestration
///
/// One pass per call: resolve config → batch-load facts for all candidate
/// ids → score each candidate → stable sort → truncate. A broken ranking
/// stage degrades the experience, it never breaks the page: fact-load
/// failures return the candidates unranked in their original order, and
/// only an expired deadline surfaces as a hard error.
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ConfigResolver, RankingConfig, RankingDomain};
use crate::db::FactSource;
use crate::error::{RankingError, Result};
use crate::models::{
    Candidate, Listing, Member, RankOptions, RankedCandidate, RankingFacts, ScoreBreakdown,
    ShortlistItem, ViewerContext,
};
use crate::services::query::{BuiltQuery, ListingFilter, MemberFilter, RankedQueryBuilder};
use crate::services::scoring::{sort_ranked, ScoreEngine};

/// How much larger a recommendation shortlist is than the final page, so
/// that the reciprocity re-weighting pass cannot starve it.
pub const RECOMMEND_OVERSAMPLE: usize = 3;

/// Shortlist size callers should fetch for a recommendation page of
/// `limit` items.
pub fn shortlist_size(limit: usize) -> usize {
    limit.saturating_mul(RECOMMEND_OVERSAMPLE)
}

pub struct RankingService {
    resolver: Arc<ConfigResolver>,
    facts: Arc<dyn FactSource>,
}

impl RankingService {
    pub fn new(resolver: Arc<ConfigResolver>, facts: Arc<dyn FactSource>) -> Self {
        Self { resolver, facts }
    }

    /// Rank a set of already-fetched listings for a viewer.
    pub async fn rank_listings(
        &self,
        tenant_id: Uuid,
        viewer_id: Option<Uuid>,
        listings: Vec<Listing>,
        opts: &RankOptions,
    ) -> Result<Vec<RankedCandidate>> {
        let candidates = listings.into_iter().map(Candidate::Listing).collect();
        self.rank_candidates(tenant_id, RankingDomain::Listings, viewer_id, candidates, opts)
            .await
    }

    /// Rank a set of already-fetched members for a viewer.
    pub async fn rank_members(
        &self,
        tenant_id: Uuid,
        viewer_id: Option<Uuid>,
        members: Vec<Member>,
        opts: &RankOptions,
    ) -> Result<Vec<RankedCandidate>> {
        let candidates = members.into_iter().map(Candidate::Member).collect();
        self.rank_candidates(tenant_id, RankingDomain::Members, viewer_id, candidates, opts)
            .await
    }

    /// Build a ranked, paginated listing query for the calling data-access
    /// layer to execute. Personalization that cannot be expressed in SQL is
    /// left to `recommend_listings` over the fetched shortlist.
    pub async fn build_listing_query(
        &self,
        tenant_id: Uuid,
        viewer_id: Option<Uuid>,
        filter: &ListingFilter,
    ) -> BuiltQuery {
        let config = self.resolver.resolve(tenant_id, RankingDomain::Listings).await;
        let ctx = self.viewer_context_or_degraded(tenant_id, viewer_id).await;
        RankedQueryBuilder::new(&config).listing_query(tenant_id, &ctx, filter)
    }

    /// Build a ranked member-directory query.
    pub async fn build_member_query(
        &self,
        tenant_id: Uuid,
        viewer_id: Option<Uuid>,
        filter: &MemberFilter,
    ) -> BuiltQuery {
        let config = self.resolver.resolve(tenant_id, RankingDomain::Members).await;
        let ctx = self.viewer_context_or_degraded(tenant_id, viewer_id).await;
        RankedQueryBuilder::new(&config).member_query(tenant_id, &ctx, filter)
    }

    /// Personalized recommendations: multiply the in-process relevance and
    /// reciprocity factors into an already SQL-ranked shortlist, re-sort,
    /// truncate. Callers fetch `shortlist_size(limit)` rows.
    pub async fn recommend_listings(
        &self,
        tenant_id: Uuid,
        viewer_id: Option<Uuid>,
        shortlist: Vec<ShortlistItem>,
        limit: usize,
    ) -> Result<Vec<RankedCandidate>> {
        let config = self.resolver.resolve(tenant_id, RankingDomain::Listings).await;

        if !config.enabled {
            let mut passed = passthrough(
                shortlist
                    .into_iter()
                    .map(|item| Candidate::Listing(item.listing))
                    .collect(),
            );
            passed.truncate(limit);
            return Ok(passed);
        }

        let ctx = self.viewer_context_or_degraded(tenant_id, viewer_id).await;
        let engine = ScoreEngine::new(&config, Utc::now(), None);

        let mut ranked: Vec<RankedCandidate> = shortlist
            .into_iter()
            .map(|item| {
                let candidate = Candidate::Listing(item.listing);
                let (relevance, reciprocity) = engine.shortlist_factors(&candidate, &ctx);
                RankedCandidate {
                    candidate,
                    breakdown: ScoreBreakdown {
                        relevance,
                        // Folded into the SQL rank_score already
                        freshness: 1.0,
                        engagement: 1.0,
                        proximity: 1.0,
                        quality: 1.0,
                        reciprocity,
                        total: item.rank_score * relevance * reciprocity,
                    },
                }
            })
            .collect();

        sort_ranked(&mut ranked);
        ranked.truncate(limit);

        debug!(
            tenant_id = %tenant_id,
            result_count = ranked.len(),
            top_score = ranked.first().map(|r| r.score()),
            "Recommendations re-weighted"
        );
        Ok(ranked)
    }

    async fn rank_candidates(
        &self,
        tenant_id: Uuid,
        domain: RankingDomain,
        viewer_id: Option<Uuid>,
        candidates: Vec<Candidate>,
        opts: &RankOptions,
    ) -> Result<Vec<RankedCandidate>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let config = self.resolver.resolve(tenant_id, domain).await;
        if !config.enabled {
            debug!(tenant_id = %tenant_id, domain = %domain, "Ranking disabled, passing candidates through");
            return Ok(passthrough(candidates));
        }

        let load = self.load_facts(tenant_id, domain, viewer_id, &candidates, &config);
        let loaded = match opts.deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), load).await
                {
                    Ok(result) => result,
                    Err(_) => return Err(RankingError::DeadlineExceeded),
                }
            }
            None => load.await,
        };

        let (ctx, facts) = match loaded {
            Ok(pair) => pair,
            Err(e) => {
                warn!(
                    tenant_id = %tenant_id,
                    domain = %domain,
                    error = %e,
                    "Fact loading failed, returning candidates unranked"
                );
                return Ok(passthrough(candidates));
            }
        };

        let engine = ScoreEngine::new(&config, Utc::now(), opts.search.as_deref());
        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .map(|candidate| {
                let breakdown = engine.score(&candidate, &ctx, &facts);
                RankedCandidate {
                    candidate,
                    breakdown,
                }
            })
            .collect();

        sort_ranked(&mut ranked);
        if let Some(limit) = opts.limit {
            ranked.truncate(limit);
        }

        debug!(
            tenant_id = %tenant_id,
            domain = %domain,
            result_count = ranked.len(),
            top_score = ranked.first().map(|r| r.score()),
            "Ranking complete"
        );
        Ok(ranked)
    }

    /// Load the viewer context and every per-candidate fact batch. One
    /// query per fact type; nothing is fetched per candidate.
    async fn load_facts(
        &self,
        tenant_id: Uuid,
        domain: RankingDomain,
        viewer_id: Option<Uuid>,
        candidates: &[Candidate],
        config: &RankingConfig,
    ) -> Result<(ViewerContext, RankingFacts)> {
        let ctx = self.facts.viewer_context(tenant_id, viewer_id).await?;
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.id()).collect();

        let mut facts = RankingFacts::default();
        match domain {
            RankingDomain::Listings => {
                // Owner coordinates only matter for listings without their own.
                let owner_ids: Vec<Uuid> = candidates
                    .iter()
                    .filter_map(|c| match c {
                        Candidate::Listing(l) if l.coordinates.is_none() => Some(l.owner_id),
                        _ => None,
                    })
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect();

                let (engagement, owner_coordinates) = tokio::join!(
                    self.facts.listing_engagement(tenant_id, &ids),
                    self.facts.owner_coordinates(tenant_id, &owner_ids),
                );
                facts.engagement = engagement?;
                facts.owner_coordinates = owner_coordinates?;
            }
            RankingDomain::Members => {
                // The mutual-reciprocity check only runs when the viewer has
                // listings of their own, so skip the batch otherwise.
                let want_reciprocity =
                    config.reciprocity.enabled && !ctx.own_listings.is_empty();
                if want_reciprocity {
                    let (engagement, member_listings) = tokio::join!(
                        self.facts.member_engagement(tenant_id, &ids),
                        self.facts.member_listings(tenant_id, &ids),
                    );
                    facts.engagement = engagement?;
                    facts.member_listings = member_listings?;
                } else {
                    facts.engagement = self.facts.member_engagement(tenant_id, &ids).await?;
                }
            }
        }

        Ok((ctx, facts))
    }

    async fn viewer_context_or_degraded(
        &self,
        tenant_id: Uuid,
        viewer_id: Option<Uuid>,
    ) -> ViewerContext {
        match self.facts.viewer_context(tenant_id, viewer_id).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "Viewer context unavailable, continuing without personalization"
                );
                ViewerContext {
                    viewer_id,
                    ..ViewerContext::anonymous()
                }
            }
        }
    }
}

/// Candidates wrapped unscored, original order preserved.
fn passthrough(candidates: Vec<Candidate>) -> Vec<RankedCandidate> {
    candidates
        .into_iter()
        .map(|candidate| RankedCandidate {
            candidate,
            breakdown: ScoreBreakdown::neutral(),
        })
        .collect()
}
