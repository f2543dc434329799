pub mod candidate_repo;
pub mod settings_repo;

pub use candidate_repo::{CandidateRepository, FactSource};
pub use settings_repo::PgSettingsStore;
