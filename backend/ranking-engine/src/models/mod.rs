/// Data models for the ranking engine
///
/// Candidates are read-only snapshots for the duration of one ranking call;
/// nothing here is mutated by the engine. Per-candidate facts that arrive
/// from batch lookups (engagement counters, owner coordinates, a member's
/// own listings) live in `RankingFacts`, keyed by id, so the scoring loop
/// never touches the database.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Coordinate pair (WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Build a point, rejecting out-of-range values. Invalid coordinates
    /// are treated as absent by the scoring code, never as an error.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return None;
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        Some(Self {
            latitude,
            longitude,
        })
    }

    /// Assemble a point from nullable database columns.
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Self::new(lat, lon),
            _ => None,
        }
    }
}

/// Listing type. Every listing is either an offer or a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    Offer,
    Request,
}

impl ListingType {
    /// The type that completes an exchange with this one.
    pub fn complement(&self) -> ListingType {
        match self {
            Self::Offer => Self::Request,
            Self::Request => Self::Offer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Request => "request",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "offer" => Some(Self::Offer),
            "request" => Some(Self::Request),
            _ => None,
        }
    }
}

impl std::fmt::Display for ListingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A listing being ranked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub owner_id: Uuid,
    pub listing_type: ListingType,
    pub category_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub coordinates: Option<GeoPoint>,
    pub has_image: bool,
    pub owner_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A member being ranked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub display_name: String,
    pub bio: String,
    pub coordinates: Option<GeoPoint>,
    pub has_avatar: bool,
    pub verified: bool,
    pub listing_count: i64,
    pub group_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// An entity being ranked: a listing or a member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Candidate {
    Listing(Listing),
    Member(Member),
}

impl Candidate {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Listing(l) => l.id,
            Self::Member(m) => m.id,
        }
    }

    pub fn coordinates(&self) -> Option<GeoPoint> {
        match self {
            Self::Listing(l) => l.coordinates,
            Self::Member(m) => m.coordinates,
        }
    }

    pub fn category_id(&self) -> Option<i64> {
        match self {
            Self::Listing(l) => l.category_id,
            Self::Member(_) => None,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Listing(l) => l.created_at,
            Self::Member(m) => m.created_at,
        }
    }

    /// The later of creation and last-edit (members: last activity).
    pub fn freshest_at(&self) -> DateTime<Utc> {
        match self {
            Self::Listing(l) => l.updated_at.map_or(l.created_at, |u| u.max(l.created_at)),
            Self::Member(m) => m
                .last_active_at
                .map_or(m.created_at, |a| a.max(m.created_at)),
        }
    }

    /// Text searched with the title-level boost.
    pub fn search_title(&self) -> &str {
        match self {
            Self::Listing(l) => &l.title,
            Self::Member(m) => &m.display_name,
        }
    }

    /// Text searched with the weaker description-level boost.
    pub fn search_body(&self) -> &str {
        match self {
            Self::Listing(l) => &l.description,
            Self::Member(m) => &m.bio,
        }
    }
}

/// Compact view of a listing used for interest/reciprocity checks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ListingSummary {
    pub id: Uuid,
    pub listing_type: ListingType,
    pub category_id: Option<i64>,
}

/// Facts about the requesting user, built once per ranking call
#[derive(Debug, Clone, Default)]
pub struct ViewerContext {
    pub viewer_id: Option<Uuid>,
    pub coordinates: Option<GeoPoint>,
    /// Category ids derived from the viewer's own active listings
    pub interest_categories: HashSet<i64>,
    pub own_listings: Vec<ListingSummary>,
    pub group_ids: HashSet<Uuid>,
}

impl ViewerContext {
    /// Context for a viewer without an account. Ranking still works; the
    /// personalized factors all score neutral.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Does the viewer hold a listing of `listing_type` in `category_id`?
    pub fn holds_listing(&self, listing_type: ListingType, category_id: i64) -> bool {
        self.own_listings.iter().any(|own| {
            own.listing_type == listing_type && own.category_id == Some(category_id)
        })
    }
}

/// Engagement counters batch-loaded per candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementCounters {
    Listing {
        views: i64,
        inquiries: i64,
        saves: i64,
    },
    Member {
        logins: i64,
        posts: i64,
        comments: i64,
        transactions: i64,
    },
}

/// Batch-lookup results for one ranking call. A candidate missing from any
/// map is scored with neutral facts, never fetched individually.
#[derive(Debug, Clone, Default)]
pub struct RankingFacts {
    pub engagement: HashMap<Uuid, EngagementCounters>,
    /// Fallback coordinates for listings whose rows carry none
    pub owner_coordinates: HashMap<Uuid, GeoPoint>,
    /// Active listings of member candidates, for the mutual-reciprocity check
    pub member_listings: HashMap<Uuid, Vec<ListingSummary>>,
}

/// The six multiplicative factors and their product
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoreBreakdown {
    pub relevance: f64,
    pub freshness: f64,
    pub engagement: f64,
    pub proximity: f64,
    pub quality: f64,
    pub reciprocity: f64,
    pub total: f64,
}

impl ScoreBreakdown {
    /// All factors neutral, for unranked passthrough.
    pub fn neutral() -> Self {
        Self {
            relevance: 1.0,
            freshness: 1.0,
            engagement: 1.0,
            proximity: 1.0,
            quality: 1.0,
            reciprocity: 1.0,
            total: 1.0,
        }
    }
}

/// A candidate annotated with its score breakdown
#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub candidate: Candidate,
    pub breakdown: ScoreBreakdown,
}

impl RankedCandidate {
    pub fn score(&self) -> f64 {
        self.breakdown.total
    }
}

/// A SQL-ranked shortlist row awaiting the in-process re-weighting pass
#[derive(Debug, Clone)]
pub struct ShortlistItem {
    pub listing: Listing,
    pub rank_score: f64,
}

/// Options for the rank-given-rows path
#[derive(Debug, Clone, Default)]
pub struct RankOptions {
    /// Free-text search term; matches boost relevance
    pub search: Option<String>,
    /// Page size; `None` ranks without truncating
    pub limit: Option<usize>,
    /// Overall deadline for the fact-loading stage
    pub deadline: Option<std::time::Instant>,
}
