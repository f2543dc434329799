//! Multi-factor ranking engine for the Harbor community platform.
//!
//! Orders listings and members for a viewing user by multiplying six
//! factors: relevance, freshness, engagement, proximity, quality, and
//! reciprocity. Two execution paths must agree: in-process scoring over
//! materialized rows, and equivalent scoring synthesized as SQL.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::{ConfigResolver, RankingConfig, RankingDomain, SettingsStore};
pub use db::{CandidateRepository, FactSource, PgSettingsStore};
pub use error::{RankingError, Result};
pub use services::query::{BuiltQuery, ListingFilter, MemberFilter, RankedQueryBuilder, SqlValue};
pub use services::ranking::{shortlist_size, RankingService, RECOMMEND_OVERSAMPLE};
pub use services::scoring::ScoreEngine;
