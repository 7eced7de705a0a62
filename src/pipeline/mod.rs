// Resolution pipeline: ranked steps, registry matching and address rules

pub mod address;
pub mod registry_matcher;
pub mod registry_query;
pub mod resolution;
pub mod steps;

pub use registry_matcher::{MatchReport, RegistryMatch, RegistryMatcher};
pub use registry_query::QueryBuilder;
pub use resolution::ResolutionPipeline;
pub use steps::{PartnerLookupStep, RegistryVerificationStep, ResolutionStep, StepSuccess};
