/// Ranking configuration resolution
///
/// A tenant stores an optional JSON blob per ranking domain. Resolution
/// merges that blob field-by-field over a hard-coded default table, so a
/// partially-specified override is always safe and downstream code never
/// checks for missing keys. Resolution never fails: any read or parse
/// problem falls back to the defaults.
///
/// Resolved configs are cached per `(tenant, domain)` for the life of the
/// process. Callers that write tenant settings must invalidate explicitly.
use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// The two ranking domains, each with its own configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RankingDomain {
    Listings,
    Members,
}

impl RankingDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listings => "listings",
            Self::Members => "members",
        }
    }

    /// Key of the tenant settings blob for this domain.
    pub fn settings_key(&self) -> &'static str {
        match self {
            Self::Listings => "ranking.listings",
            Self::Members => "ranking.members",
        }
    }
}

impl std::fmt::Display for RankingDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Geographic decay parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoConfig {
    pub enabled: bool,
    pub full_radius_km: f64,
    pub decay_per_km: f64,
}

/// Reciprocity boost parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReciprocityConfig {
    pub enabled: bool,
    /// One-way complementary match
    pub match_boost: f64,
    /// Both directions hold (members only)
    pub mutual_boost: f64,
}

/// Fully-populated weights and thresholds for one (tenant, domain).
///
/// Invariant: every field carries a usable value. Construction goes through
/// the defaults table, so downstream code never handles absence.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingConfig {
    pub enabled: bool,

    pub relevance_category_match: f64,
    pub relevance_search_boost: f64,

    pub freshness_full_days: f64,
    pub freshness_half_life_days: f64,
    pub freshness_minimum: f64,

    // Listing counters
    pub engagement_view_weight: f64,
    pub engagement_inquiry_weight: f64,
    pub engagement_save_weight: f64,
    // Member counters
    pub engagement_login_weight: f64,
    pub engagement_post_weight: f64,
    pub engagement_comment_weight: f64,
    pub engagement_transaction_weight: f64,
    pub engagement_scale: f64,
    pub engagement_minimum: f64,

    pub quality_description_min_chars: usize,
    pub quality_description_boost: f64,
    pub quality_image_boost: f64,
    pub quality_location_boost: f64,
    pub quality_verified_boost: f64,

    pub reciprocity: ReciprocityConfig,
    pub geo: GeoConfig,
}

static LISTING_DEFAULTS: Lazy<RankingConfig> = Lazy::new(|| RankingConfig {
    enabled: true,
    relevance_category_match: 1.5,
    relevance_search_boost: 1.4,
    freshness_full_days: 7.0,
    freshness_half_life_days: 30.0,
    freshness_minimum: 0.05,
    engagement_view_weight: 1.0,
    engagement_inquiry_weight: 5.0,
    engagement_save_weight: 3.0,
    engagement_login_weight: 1.0,
    engagement_post_weight: 3.0,
    engagement_comment_weight: 2.0,
    engagement_transaction_weight: 5.0,
    engagement_scale: 100.0,
    engagement_minimum: 0.2,
    quality_description_min_chars: 160,
    quality_description_boost: 1.10,
    quality_image_boost: 1.15,
    quality_location_boost: 1.05,
    quality_verified_boost: 1.20,
    reciprocity: ReciprocityConfig {
        enabled: true,
        match_boost: 1.3,
        mutual_boost: 1.6,
    },
    geo: GeoConfig {
        enabled: true,
        full_radius_km: 25.0,
        decay_per_km: 0.05,
    },
});

static MEMBER_DEFAULTS: Lazy<RankingConfig> = Lazy::new(|| RankingConfig {
    enabled: true,
    relevance_category_match: 1.5,
    relevance_search_boost: 1.4,
    // Member activity goes stale slower than listings
    freshness_full_days: 14.0,
    freshness_half_life_days: 60.0,
    freshness_minimum: 0.1,
    engagement_view_weight: 1.0,
    engagement_inquiry_weight: 5.0,
    engagement_save_weight: 3.0,
    engagement_login_weight: 1.0,
    engagement_post_weight: 3.0,
    engagement_comment_weight: 2.0,
    engagement_transaction_weight: 5.0,
    engagement_scale: 100.0,
    engagement_minimum: 0.2,
    quality_description_min_chars: 120,
    quality_description_boost: 1.10,
    quality_image_boost: 1.15,
    quality_location_boost: 1.05,
    quality_verified_boost: 1.20,
    reciprocity: ReciprocityConfig {
        enabled: true,
        match_boost: 1.3,
        mutual_boost: 1.6,
    },
    geo: GeoConfig {
        enabled: true,
        full_radius_km: 25.0,
        decay_per_km: 0.05,
    },
});

impl RankingConfig {
    /// Hard-coded defaults for a domain.
    pub fn defaults(domain: RankingDomain) -> &'static RankingConfig {
        match domain {
            RankingDomain::Listings => &LISTING_DEFAULTS,
            RankingDomain::Members => &MEMBER_DEFAULTS,
        }
    }

    /// Defaults with each overridden field replaced.
    fn merged(defaults: &RankingConfig, overrides: &ConfigOverrides) -> RankingConfig {
        let geo_overrides = overrides.geo.as_ref();
        let reciprocity_overrides = overrides.reciprocity.as_ref();

        RankingConfig {
            enabled: overrides.enabled.unwrap_or(defaults.enabled),
            relevance_category_match: overrides
                .relevance_category_match
                .unwrap_or(defaults.relevance_category_match),
            relevance_search_boost: overrides
                .relevance_search_boost
                .unwrap_or(defaults.relevance_search_boost),
            freshness_full_days: overrides
                .freshness_full_days
                .unwrap_or(defaults.freshness_full_days),
            freshness_half_life_days: overrides
                .freshness_half_life_days
                .unwrap_or(defaults.freshness_half_life_days),
            freshness_minimum: overrides
                .freshness_minimum
                .unwrap_or(defaults.freshness_minimum),
            engagement_view_weight: overrides
                .engagement_view_weight
                .unwrap_or(defaults.engagement_view_weight),
            engagement_inquiry_weight: overrides
                .engagement_inquiry_weight
                .unwrap_or(defaults.engagement_inquiry_weight),
            engagement_save_weight: overrides
                .engagement_save_weight
                .unwrap_or(defaults.engagement_save_weight),
            engagement_login_weight: overrides
                .engagement_login_weight
                .unwrap_or(defaults.engagement_login_weight),
            engagement_post_weight: overrides
                .engagement_post_weight
                .unwrap_or(defaults.engagement_post_weight),
            engagement_comment_weight: overrides
                .engagement_comment_weight
                .unwrap_or(defaults.engagement_comment_weight),
            engagement_transaction_weight: overrides
                .engagement_transaction_weight
                .unwrap_or(defaults.engagement_transaction_weight),
            engagement_scale: overrides
                .engagement_scale
                .unwrap_or(defaults.engagement_scale),
            engagement_minimum: overrides
                .engagement_minimum
                .unwrap_or(defaults.engagement_minimum),
            quality_description_min_chars: overrides
                .quality_description_min_chars
                .unwrap_or(defaults.quality_description_min_chars),
            quality_description_boost: overrides
                .quality_description_boost
                .unwrap_or(defaults.quality_description_boost),
            quality_image_boost: overrides
                .quality_image_boost
                .unwrap_or(defaults.quality_image_boost),
            quality_location_boost: overrides
                .quality_location_boost
                .unwrap_or(defaults.quality_location_boost),
            quality_verified_boost: overrides
                .quality_verified_boost
                .unwrap_or(defaults.quality_verified_boost),
            reciprocity: ReciprocityConfig {
                enabled: reciprocity_overrides
                    .and_then(|r| r.enabled)
                    .unwrap_or(defaults.reciprocity.enabled),
                match_boost: reciprocity_overrides
                    .and_then(|r| r.match_boost)
                    .unwrap_or(defaults.reciprocity.match_boost),
                mutual_boost: reciprocity_overrides
                    .and_then(|r| r.mutual_boost)
                    .unwrap_or(defaults.reciprocity.mutual_boost),
            },
            geo: GeoConfig {
                enabled: geo_overrides
                    .and_then(|g| g.enabled)
                    .unwrap_or(defaults.geo.enabled),
                full_radius_km: geo_overrides
                    .and_then(|g| g.full_radius_km)
                    .unwrap_or(defaults.geo.full_radius_km),
                decay_per_km: geo_overrides
                    .and_then(|g| g.decay_per_km)
                    .unwrap_or(defaults.geo.decay_per_km),
            },
        }
    }
}

/// Shape of the per-tenant configuration blob. All fields optional.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigOverrides {
    pub enabled: Option<bool>,
    pub relevance_category_match: Option<f64>,
    pub relevance_search_boost: Option<f64>,
    pub freshness_full_days: Option<f64>,
    pub freshness_half_life_days: Option<f64>,
    pub freshness_minimum: Option<f64>,
    pub engagement_view_weight: Option<f64>,
    pub engagement_inquiry_weight: Option<f64>,
    pub engagement_save_weight: Option<f64>,
    pub engagement_login_weight: Option<f64>,
    pub engagement_post_weight: Option<f64>,
    pub engagement_comment_weight: Option<f64>,
    pub engagement_transaction_weight: Option<f64>,
    pub engagement_scale: Option<f64>,
    pub engagement_minimum: Option<f64>,
    pub quality_description_min_chars: Option<usize>,
    pub quality_description_boost: Option<f64>,
    pub quality_image_boost: Option<f64>,
    pub quality_location_boost: Option<f64>,
    pub quality_verified_boost: Option<f64>,
    pub reciprocity: Option<ReciprocityOverrides>,
    pub geo: Option<GeoOverrides>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReciprocityOverrides {
    pub enabled: Option<bool>,
    pub match_boost: Option<f64>,
    pub mutual_boost: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GeoOverrides {
    pub enabled: Option<bool>,
    pub full_radius_km: Option<f64>,
    pub decay_per_km: Option<f64>,
}

/// Read access to tenant settings blobs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Raw ranking-configuration blob for a tenant and domain, if any.
    async fn ranking_overrides(
        &self,
        tenant_id: Uuid,
        domain: RankingDomain,
    ) -> Result<Option<serde_json::Value>>;
}

/// Resolves and caches the active configuration per (tenant, domain)
pub struct ConfigResolver {
    store: Arc<dyn SettingsStore>,
    cache: DashMap<(Uuid, RankingDomain), Arc<RankingConfig>>,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Resolve the active configuration. Never fails: read and parse
    /// problems fall back to the hard-coded defaults.
    pub async fn resolve(&self, tenant_id: Uuid, domain: RankingDomain) -> Arc<RankingConfig> {
        if let Some(cached) = self.cache.get(&(tenant_id, domain)) {
            return cached.value().clone();
        }

        let defaults = RankingConfig::defaults(domain);
        let config = match self.store.ranking_overrides(tenant_id, domain).await {
            Ok(Some(blob)) => match serde_json::from_value::<ConfigOverrides>(blob) {
                Ok(overrides) => RankingConfig::merged(defaults, &overrides),
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        domain = %domain,
                        error = %e,
                        "Malformed ranking config blob, using defaults"
                    );
                    defaults.clone()
                }
            },
            Ok(None) => defaults.clone(),
            Err(e) => {
                warn!(
                    tenant_id = %tenant_id,
                    domain = %domain,
                    error = %e,
                    "Failed to read ranking config, using defaults"
                );
                defaults.clone()
            }
        };

        let config = Arc::new(config);
        self.cache.insert((tenant_id, domain), config.clone());
        debug!(tenant_id = %tenant_id, domain = %domain, "Ranking config resolved");
        config
    }

    /// Drop the cached entry for one (tenant, domain). Must be called after
    /// a tenant configuration write.
    pub fn invalidate(&self, tenant_id: Uuid, domain: RankingDomain) {
        self.cache.remove(&(tenant_id, domain));
    }

    /// Drop every cached entry for a tenant.
    pub fn invalidate_tenant(&self, tenant_id: Uuid) {
        self.cache.retain(|(cached_tenant, _), _| *cached_tenant != tenant_id);
    }
}
