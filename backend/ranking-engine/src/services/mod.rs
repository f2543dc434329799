pub mod geo;
pub mod query;
pub mod ranking;
pub mod scoring;

pub use query::RankedQueryBuilder;
pub use ranking::RankingService;
pub use scoring::ScoreEngine;
