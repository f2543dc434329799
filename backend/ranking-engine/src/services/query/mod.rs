/// Ranked query synthesis
///
/// Emits the cheaply-computable factors (freshness, quality, geo) as inline
/// scalar SQL expressions multiplied into a `rank_score` column, so the
/// database can pre-sort and paginate large candidate sets. Engagement
/// stays a literal `1.0` at this layer until per-row counters exist as
/// indexed columns; relevance and reciprocity need per-viewer set logic and
/// are applied in-process to the fetched shortlist.
///
/// Every caller-supplied value is a bound parameter. Every query is
/// tenant-scoped. The engine does not own a connection; callers execute
/// the returned `BuiltQuery` through their own data-access layer.
use uuid::Uuid;

use crate::config::RankingConfig;
use crate::models::{ListingType, ViewerContext};
use crate::utils::HALF_LIFE_LN2;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// A parameter bound into a built query
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
}

/// A parameterized query plus its bound values, in placeholder order
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Filter bag for the listing query path
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub listing_type: Option<ListingType>,
    pub category_id: Option<i64>,
    pub owner_id: Option<Uuid>,
    pub search: Option<String>,
    /// Keep the viewer's own listings in the result
    pub include_own: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Filter bag for the member-directory query path
#[derive(Debug, Clone, Default)]
pub struct MemberFilter {
    pub search: Option<String>,
    pub group_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Accumulates bound parameters and hands out `$n` placeholders
#[derive(Debug, Default)]
struct SqlComposer {
    params: Vec<SqlValue>,
}

impl SqlComposer {
    fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }
}

/// Escape LIKE wildcards in a user-supplied search term.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

/// Column names feeding the scoring sub-expressions for one domain
struct ScoreColumns<'a> {
    /// Timestamp expression for the freshness age
    freshest: &'a str,
    description: &'a str,
    has_image: &'a str,
    latitude: &'a str,
    longitude: &'a str,
    verified: &'a str,
}

pub struct RankedQueryBuilder<'a> {
    config: &'a RankingConfig,
}

impl<'a> RankedQueryBuilder<'a> {
    pub fn new(config: &'a RankingConfig) -> Self {
        Self { config }
    }

    /// Ranked, filtered, paginated listing query.
    pub fn listing_query(
        &self,
        tenant_id: Uuid,
        viewer: &ViewerContext,
        filter: &ListingFilter,
    ) -> BuiltQuery {
        let mut composer = SqlComposer::default();
        let tenant = composer.bind(SqlValue::Uuid(tenant_id));

        let columns = ScoreColumns {
            freshest: "GREATEST(l.created_at, COALESCE(l.updated_at, l.created_at))",
            description: "l.description",
            has_image: "l.has_image",
            // Listings without own coordinates fall back to the owner's,
            // same as the in-process path.
            latitude: "COALESCE(l.latitude, u.latitude)",
            longitude: "COALESCE(l.longitude, u.longitude)",
            verified: "u.verified",
        };
        let rank_score = self.rank_score_expr(&mut composer, &columns, viewer);

        let mut sql = format!(
            "SELECT l.id, l.tenant_id, l.owner_id, l.listing_type, l.category_id, \
             l.title, l.description, l.latitude, l.longitude, l.has_image, \
             u.verified AS owner_verified, l.created_at, l.updated_at, \
             {rank_score} AS rank_score \
             FROM listings l \
             JOIN users u ON u.id = l.owner_id AND u.tenant_id = l.tenant_id \
             WHERE l.tenant_id = {tenant} AND l.status = 'active' AND l.deleted_at IS NULL"
        );

        if let Some(listing_type) = filter.listing_type {
            let p = composer.bind(SqlValue::Text(listing_type.as_str().to_string()));
            sql.push_str(&format!(" AND l.listing_type = {p}"));
        }
        if let Some(category_id) = filter.category_id {
            let p = composer.bind(SqlValue::Int(category_id));
            sql.push_str(&format!(" AND l.category_id = {p}"));
        }
        if let Some(owner_id) = filter.owner_id {
            let p = composer.bind(SqlValue::Uuid(owner_id));
            sql.push_str(&format!(" AND l.owner_id = {p}"));
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = composer.bind(SqlValue::Text(format!("%{}%", escape_like(search.trim()))));
            sql.push_str(&format!(
                " AND (l.title ILIKE {pattern} OR l.description ILIKE {pattern})"
            ));
        }
        if !filter.include_own {
            if let Some(viewer_id) = viewer.viewer_id {
                let p = composer.bind(SqlValue::Uuid(viewer_id));
                sql.push_str(&format!(" AND l.owner_id <> {p}"));
            }
        }

        let (limit, offset) = clamp_page(filter.limit, filter.offset);
        let limit_p = composer.bind(SqlValue::Int(limit));
        let offset_p = composer.bind(SqlValue::Int(offset));
        sql.push_str(&format!(
            " ORDER BY rank_score DESC, l.created_at DESC LIMIT {limit_p} OFFSET {offset_p}"
        ));

        BuiltQuery {
            sql,
            params: composer.params,
        }
    }

    /// Ranked member-directory query, composed from the same scoring
    /// sub-expressions over member columns.
    pub fn member_query(
        &self,
        tenant_id: Uuid,
        viewer: &ViewerContext,
        filter: &MemberFilter,
    ) -> BuiltQuery {
        let mut composer = SqlComposer::default();
        let tenant = composer.bind(SqlValue::Uuid(tenant_id));

        let columns = ScoreColumns {
            freshest: "GREATEST(u.created_at, COALESCE(u.last_active_at, u.created_at))",
            description: "u.bio",
            has_image: "u.has_avatar",
            latitude: "u.latitude",
            longitude: "u.longitude",
            verified: "u.verified",
        };
        let rank_score = self.rank_score_expr(&mut composer, &columns, viewer);

        let mut sql = format!(
            "SELECT u.id, u.tenant_id, u.display_name, u.bio, u.latitude, u.longitude, \
             u.has_avatar, u.verified, u.listing_count, u.group_count, \
             u.created_at, u.last_active_at, \
             {rank_score} AS rank_score \
             FROM users u \
             WHERE u.tenant_id = {tenant} AND u.deleted_at IS NULL"
        );

        if let Some(group_id) = filter.group_id {
            let p = composer.bind(SqlValue::Uuid(group_id));
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM group_members gm \
                 WHERE gm.tenant_id = u.tenant_id AND gm.group_id = {p} AND gm.user_id = u.id)"
            ));
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = composer.bind(SqlValue::Text(format!("%{}%", escape_like(search.trim()))));
            sql.push_str(&format!(
                " AND (u.display_name ILIKE {pattern} OR u.bio ILIKE {pattern})"
            ));
        }
        if let Some(viewer_id) = viewer.viewer_id {
            let p = composer.bind(SqlValue::Uuid(viewer_id));
            sql.push_str(&format!(" AND u.id <> {p}"));
        }

        let (limit, offset) = clamp_page(filter.limit, filter.offset);
        let limit_p = composer.bind(SqlValue::Int(limit));
        let offset_p = composer.bind(SqlValue::Int(offset));
        sql.push_str(&format!(
            " ORDER BY rank_score DESC, u.created_at DESC LIMIT {limit_p} OFFSET {offset_p}"
        ));

        BuiltQuery {
            sql,
            params: composer.params,
        }
    }

    /// The full `rank_score` product: freshness * quality * geo, with
    /// engagement held at a neutral 1.0 placeholder.
    fn rank_score_expr(
        &self,
        composer: &mut SqlComposer,
        columns: &ScoreColumns<'_>,
        viewer: &ViewerContext,
    ) -> String {
        if !self.config.enabled {
            // Passthrough: identical ORDER BY shape, constant score, so the
            // secondary created_at key decides the order alone.
            return "1.0".to_string();
        }

        let freshness = self.freshness_expr(composer, columns);
        let quality = self.quality_expr(composer, columns);
        let geo = self.geo_expr(composer, columns, viewer);
        format!("({freshness} * {quality} * {geo} * 1.0)")
    }

    fn freshness_expr(&self, composer: &mut SqlComposer, columns: &ScoreColumns<'_>) -> String {
        let age_days = format!(
            "(EXTRACT(EPOCH FROM (NOW() - {})) / 86400.0)",
            columns.freshest
        );
        let full = composer.bind(SqlValue::Float(self.config.freshness_full_days));
        let half_life = composer.bind(SqlValue::Float(self.config.freshness_half_life_days));
        let minimum = composer.bind(SqlValue::Float(self.config.freshness_minimum));

        format!(
            "(CASE WHEN {age_days} <= {full} THEN 1.0 \
             ELSE GREATEST({minimum}, EXP(-{HALF_LIFE_LN2} * ({age_days} - {full}) / {half_life})) END)"
        )
    }

    fn quality_expr(&self, composer: &mut SqlComposer, columns: &ScoreColumns<'_>) -> String {
        let min_chars = composer.bind(SqlValue::Int(
            self.config.quality_description_min_chars as i64,
        ));
        let description_boost = composer.bind(SqlValue::Float(self.config.quality_description_boost));
        let image_boost = composer.bind(SqlValue::Float(self.config.quality_image_boost));
        let location_boost = composer.bind(SqlValue::Float(self.config.quality_location_boost));
        let verified_boost = composer.bind(SqlValue::Float(self.config.quality_verified_boost));

        format!(
            "((CASE WHEN LENGTH({description}) >= {min_chars} THEN {description_boost} ELSE 1.0 END) \
             * (CASE WHEN {has_image} THEN {image_boost} ELSE 1.0 END) \
             * (CASE WHEN {latitude} IS NOT NULL AND {longitude} IS NOT NULL THEN {location_boost} ELSE 1.0 END) \
             * (CASE WHEN {verified} THEN {verified_boost} ELSE 1.0 END))",
            description = columns.description,
            has_image = columns.has_image,
            latitude = columns.latitude,
            longitude = columns.longitude,
            verified = columns.verified,
        )
    }

    fn geo_expr(
        &self,
        composer: &mut SqlComposer,
        columns: &ScoreColumns<'_>,
        viewer: &ViewerContext,
    ) -> String {
        if !self.config.geo.enabled {
            return "1.0".to_string();
        }
        let Some(viewer_point) = viewer.coordinates else {
            // Proximity is not penalized when it cannot be evaluated.
            return "1.0".to_string();
        };

        let viewer_lat = composer.bind(SqlValue::Float(viewer_point.latitude));
        let viewer_lon = composer.bind(SqlValue::Float(viewer_point.longitude));
        let radius = composer.bind(SqlValue::Float(self.config.geo.full_radius_km));
        let decay = composer.bind(SqlValue::Float(self.config.geo.decay_per_km));

        // Haversine in asin/sqrt form; 6371.0 matches geo::EARTH_RADIUS_KM.
        // tests/geo_sql_parity_test.rs holds the two paths within 1e-6.
        let distance_km = format!(
            "(2.0 * 6371.0 * ASIN(SQRT(\
             POWER(SIN(RADIANS({lat} - {viewer_lat}) / 2.0), 2) \
             + COS(RADIANS({viewer_lat})) * COS(RADIANS({lat})) \
             * POWER(SIN(RADIANS({lon} - {viewer_lon}) / 2.0), 2))))",
            lat = columns.latitude,
            lon = columns.longitude,
        );

        format!(
            "(CASE WHEN {lat} IS NULL OR {lon} IS NULL THEN 1.0 \
             WHEN {distance_km} <= {radius} THEN 1.0 \
             ELSE 1.0 / (1.0 + {decay} * ({distance_km} - {radius})) END)",
            lat = columns.latitude,
            lon = columns.longitude,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RankingConfig, RankingDomain};
    use crate::models::GeoPoint;

    fn config() -> RankingConfig {
        RankingConfig::defaults(RankingDomain::Listings).clone()
    }

    fn viewer_at(lat: f64, lon: f64) -> ViewerContext {
        ViewerContext {
            viewer_id: Some(Uuid::new_v4()),
            coordinates: GeoPoint::new(lat, lon),
            ..Default::default()
        }
    }

    /// Highest `$n` placeholder index appearing in the SQL text.
    fn max_placeholder(sql: &str) -> usize {
        let bytes = sql.as_bytes();
        let mut max = 0usize;
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let mut j = i + 1;
                let mut n = 0usize;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    n = n * 10 + (bytes[j] - b'0') as usize;
                    j += 1;
                }
                if n > max {
                    max = n;
                }
                i = j;
            } else {
                i += 1;
            }
        }
        max
    }

    #[test]
    fn test_every_placeholder_has_a_bound_value() {
        let config = config();
        let builder = RankedQueryBuilder::new(&config);
        let filter = ListingFilter {
            listing_type: Some(ListingType::Offer),
            category_id: Some(5),
            owner_id: Some(Uuid::new_v4()),
            search: Some("ladder".to_string()),
            include_own: false,
            limit: Some(10),
            offset: Some(20),
        };
        let query = builder.listing_query(Uuid::new_v4(), &viewer_at(52.5, 13.4), &filter);

        assert_eq!(max_placeholder(&query.sql), query.params.len());
    }

    #[test]
    fn test_tenant_scope_is_always_first_bind() {
        let config = config();
        let builder = RankedQueryBuilder::new(&config);
        let tenant_id = Uuid::new_v4();

        let listing = builder.listing_query(
            tenant_id,
            &ViewerContext::anonymous(),
            &ListingFilter::default(),
        );
        assert!(listing.sql.contains("l.tenant_id = $1"));
        assert_eq!(listing.params[0], SqlValue::Uuid(tenant_id));

        let member = builder.member_query(
            tenant_id,
            &ViewerContext::anonymous(),
            &MemberFilter::default(),
        );
        assert!(member.sql.contains("u.tenant_id = $1"));
        assert_eq!(member.params[0], SqlValue::Uuid(tenant_id));
    }

    #[test]
    fn test_search_wildcards_are_escaped() {
        let config = config();
        let builder = RankedQueryBuilder::new(&config);
        let filter = ListingFilter {
            search: Some("50%_off".to_string()),
            ..Default::default()
        };
        let query = builder.listing_query(Uuid::new_v4(), &ViewerContext::anonymous(), &filter);

        assert!(query
            .params
            .contains(&SqlValue::Text("%50\\%\\_off%".to_string())));
    }

    #[test]
    fn test_geo_expression_omitted_without_viewer_coordinates() {
        let config = config();
        let builder = RankedQueryBuilder::new(&config);

        let anonymous = builder.listing_query(
            Uuid::new_v4(),
            &ViewerContext::anonymous(),
            &ListingFilter::default(),
        );
        assert!(!anonymous.sql.contains("ASIN"));

        let located = builder.listing_query(
            Uuid::new_v4(),
            &viewer_at(52.5, 13.4),
            &ListingFilter::default(),
        );
        assert!(located.sql.contains("ASIN"));
        assert!(located.sql.contains("6371.0"));
    }

    #[test]
    fn test_geo_disabled_in_config_omits_expression() {
        let mut config = config();
        config.geo.enabled = false;
        let builder = RankedQueryBuilder::new(&config);

        let query = builder.listing_query(
            Uuid::new_v4(),
            &viewer_at(52.5, 13.4),
            &ListingFilter::default(),
        );
        assert!(!query.sql.contains("ASIN"));
    }

    #[test]
    fn test_disabled_engine_scores_constant_one() {
        let mut config = config();
        config.enabled = false;
        let builder = RankedQueryBuilder::new(&config);

        let query = builder.listing_query(
            Uuid::new_v4(),
            &viewer_at(52.5, 13.4),
            &ListingFilter::default(),
        );
        assert!(query.sql.contains("1.0 AS rank_score"));
        assert!(!query.sql.contains("EXP"));
        assert!(query.sql.contains("ORDER BY rank_score DESC, l.created_at DESC"));
    }

    #[test]
    fn test_engagement_is_neutral_placeholder() {
        let config = config();
        let builder = RankedQueryBuilder::new(&config);
        let query = builder.listing_query(
            Uuid::new_v4(),
            &ViewerContext::anonymous(),
            &ListingFilter::default(),
        );
        // Freshness * quality * geo * neutral engagement
        assert!(query.sql.contains("* 1.0)"));
    }

    #[test]
    fn test_own_listings_excluded_unless_requested() {
        let config = config();
        let builder = RankedQueryBuilder::new(&config);
        let viewer = viewer_at(52.5, 13.4);

        let default = builder.listing_query(Uuid::new_v4(), &viewer, &ListingFilter::default());
        assert!(default.sql.contains("l.owner_id <>"));

        let with_own = builder.listing_query(
            Uuid::new_v4(),
            &viewer,
            &ListingFilter {
                include_own: true,
                ..Default::default()
            },
        );
        assert!(!with_own.sql.contains("l.owner_id <>"));
    }

    #[test]
    fn test_page_size_is_clamped() {
        let config = config();
        let builder = RankedQueryBuilder::new(&config);
        let query = builder.listing_query(
            Uuid::new_v4(),
            &ViewerContext::anonymous(),
            &ListingFilter {
                limit: Some(10_000),
                offset: Some(-5),
                ..Default::default()
            },
        );

        assert!(query.params.contains(&SqlValue::Int(MAX_PAGE_SIZE)));
        assert!(query.params.contains(&SqlValue::Int(0)));
    }

    #[test]
    fn test_member_query_filters_by_group_membership() {
        let config = RankingConfig::defaults(RankingDomain::Members).clone();
        let builder = RankedQueryBuilder::new(&config);
        let group_id = Uuid::new_v4();

        let query = builder.member_query(
            Uuid::new_v4(),
            &ViewerContext::anonymous(),
            &MemberFilter {
                group_id: Some(group_id),
                ..Default::default()
            },
        );

        assert!(query.sql.contains("EXISTS (SELECT 1 FROM group_members"));
        assert!(query.params.contains(&SqlValue::Uuid(group_id)));
        assert_eq!(max_placeholder(&query.sql), query.params.len());
    }

    #[test]
    fn test_half_life_constant_matches_in_process_path() {
        let config = config();
        let builder = RankedQueryBuilder::new(&config);
        let query = builder.listing_query(
            Uuid::new_v4(),
            &ViewerContext::anonymous(),
            &ListingFilter::default(),
        );
        assert!(query.sql.contains("EXP(-0.693"));
    }
}
