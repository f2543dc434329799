/// Candidate scoring
///
/// Computes the six-factor score breakdown for one candidate. The factors
/// are independent and multiplied, never summed, so a single factor driven
/// to zero-ish sinks the whole score. Scoring is pure and infallible:
/// missing or odd candidate fields score as the most neutral value for
/// that factor.
///
/// All facts needed here must already be resident in memory. The scoring
/// loop performs no I/O.
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::config::RankingConfig;
use crate::models::{
    Candidate, EngagementCounters, RankedCandidate, RankingFacts, ScoreBreakdown, ViewerContext,
};
use crate::services::geo;
use crate::utils::half_life_decay;

/// Weight of a description-only search match relative to a title match
const DESCRIPTION_MATCH_WEIGHT: f64 = 0.7;

pub struct ScoreEngine<'a> {
    config: &'a RankingConfig,
    now: DateTime<Utc>,
    /// Lowercased search term, if the call carries one
    search: Option<String>,
}

impl<'a> ScoreEngine<'a> {
    pub fn new(config: &'a RankingConfig, now: DateTime<Utc>, search: Option<&str>) -> Self {
        Self {
            config,
            now,
            search: search
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase),
        }
    }

    /// Score one candidate against the viewer context and batch facts.
    pub fn score(
        &self,
        candidate: &Candidate,
        ctx: &ViewerContext,
        facts: &RankingFacts,
    ) -> ScoreBreakdown {
        let relevance = self.relevance_factor(candidate, ctx);
        let freshness = self.freshness_factor(candidate);
        let engagement = self.engagement_factor(candidate, facts);
        let proximity = self.proximity_factor(candidate, ctx, facts);
        let quality = self.quality_factor(candidate);
        let reciprocity = self.reciprocity_factor(candidate, ctx, facts);

        ScoreBreakdown {
            relevance,
            freshness,
            engagement,
            proximity,
            quality,
            reciprocity,
            total: relevance * freshness * engagement * proximity * quality * reciprocity,
        }
    }

    /// The factors the SQL path cannot compute (relevance and reciprocity),
    /// for the shortlist re-weighting pass.
    pub fn shortlist_factors(&self, candidate: &Candidate, ctx: &ViewerContext) -> (f64, f64) {
        let facts = RankingFacts::default();
        (
            self.relevance_factor(candidate, ctx),
            self.reciprocity_factor(candidate, ctx, &facts),
        )
    }

    fn relevance_factor(&self, candidate: &Candidate, ctx: &ViewerContext) -> f64 {
        let mut score = 1.0;

        if let Some(category_id) = candidate.category_id() {
            if ctx.interest_categories.contains(&category_id) {
                score *= self.config.relevance_category_match;
            }
        }

        if let Some(term) = &self.search {
            if candidate.search_title().to_lowercase().contains(term) {
                score *= self.config.relevance_search_boost;
            } else if candidate.search_body().to_lowercase().contains(term) {
                // Description-only matches earn a fraction of the title boost
                score *= 1.0
                    + (self.config.relevance_search_boost - 1.0) * DESCRIPTION_MATCH_WEIGHT;
            }
        }

        score
    }

    fn freshness_factor(&self, candidate: &Candidate) -> f64 {
        let age_seconds = (self.now - candidate.freshest_at()).num_seconds();
        let age_days = (age_seconds.max(0) as f64) / 86_400.0;

        half_life_decay(
            age_days,
            self.config.freshness_full_days,
            self.config.freshness_half_life_days,
        )
        .max(self.config.freshness_minimum)
    }

    fn engagement_factor(&self, candidate: &Candidate, facts: &RankingFacts) -> f64 {
        // Counters absent from the batch result score neutral, matching the
        // SQL path's placeholder.
        let Some(counters) = facts.engagement.get(&candidate.id()) else {
            return 1.0;
        };

        let weighted = match (candidate, counters) {
            (
                Candidate::Listing(_),
                EngagementCounters::Listing {
                    views,
                    inquiries,
                    saves,
                },
            ) => {
                self.config.engagement_view_weight * *views as f64
                    + self.config.engagement_inquiry_weight * *inquiries as f64
                    + self.config.engagement_save_weight * *saves as f64
            }
            (
                Candidate::Member(_),
                EngagementCounters::Member {
                    logins,
                    posts,
                    comments,
                    transactions,
                },
            ) => {
                self.config.engagement_login_weight * *logins as f64
                    + self.config.engagement_post_weight * *posts as f64
                    + self.config.engagement_comment_weight * *comments as f64
                    + self.config.engagement_transaction_weight * *transactions as f64
            }
            // Counters of the wrong shape for this candidate
            _ => return 1.0,
        };

        (weighted / self.config.engagement_scale).max(self.config.engagement_minimum)
    }

    fn proximity_factor(
        &self,
        candidate: &Candidate,
        ctx: &ViewerContext,
        facts: &RankingFacts,
    ) -> f64 {
        if !self.config.geo.enabled {
            return 1.0;
        }

        // Listings without own coordinates fall back to the owner's.
        let target = candidate.coordinates().or_else(|| match candidate {
            Candidate::Listing(listing) => facts.owner_coordinates.get(&listing.owner_id).copied(),
            Candidate::Member(_) => None,
        });

        geo::proximity_score(
            ctx.coordinates.as_ref(),
            target.as_ref(),
            self.config.geo.full_radius_km,
            self.config.geo.decay_per_km,
        )
    }

    fn quality_factor(&self, candidate: &Candidate) -> f64 {
        let mut score = 1.0;

        if candidate.search_body().chars().count() >= self.config.quality_description_min_chars {
            score *= self.config.quality_description_boost;
        }

        let (has_image, has_location, verified) = match candidate {
            Candidate::Listing(l) => (l.has_image, l.coordinates.is_some(), l.owner_verified),
            Candidate::Member(m) => (m.has_avatar, m.coordinates.is_some(), m.verified),
        };

        if has_image {
            score *= self.config.quality_image_boost;
        }
        if has_location {
            score *= self.config.quality_location_boost;
        }
        if verified {
            score *= self.config.quality_verified_boost;
        }

        score
    }

    fn reciprocity_factor(
        &self,
        candidate: &Candidate,
        ctx: &ViewerContext,
        facts: &RankingFacts,
    ) -> f64 {
        if !self.config.reciprocity.enabled || ctx.own_listings.is_empty() {
            return 1.0;
        }

        match candidate {
            Candidate::Listing(listing) => {
                let Some(category_id) = listing.category_id else {
                    return 1.0;
                };
                if ctx.holds_listing(listing.listing_type.complement(), category_id) {
                    self.config.reciprocity.match_boost
                } else {
                    1.0
                }
            }
            Candidate::Member(member) => {
                let Some(candidate_listings) = facts.member_listings.get(&member.id) else {
                    return 1.0;
                };

                // Forward: the candidate offers something the viewer requests
                // (or requests something the viewer offers).
                let forward = candidate_listings.iter().any(|theirs| {
                    theirs.category_id.is_some_and(|category| {
                        ctx.holds_listing(theirs.listing_type.complement(), category)
                    })
                });
                // Backward: the viewer's listings complete one of theirs.
                let backward = ctx.own_listings.iter().any(|own| {
                    own.category_id.is_some_and(|category| {
                        candidate_listings.iter().any(|theirs| {
                            theirs.listing_type == own.listing_type.complement()
                                && theirs.category_id == Some(category)
                        })
                    })
                });

                match (forward, backward) {
                    (true, true) => self.config.reciprocity.mutual_boost,
                    (true, false) | (false, true) => self.config.reciprocity.match_boost,
                    (false, false) => 1.0,
                }
            }
        }
    }
}

/// Stable sort, descending by total score, ties broken by recency.
/// Equal-score, equal-recency candidates keep their original order.
pub fn sort_ranked(ranked: &mut [RankedCandidate]) {
    ranked.sort_by(|a, b| {
        b.breakdown
            .total
            .partial_cmp(&a.breakdown.total)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.candidate.created_at().cmp(&a.candidate.created_at()))
    });
}
