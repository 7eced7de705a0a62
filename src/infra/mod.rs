// Collaborator adapters behind the app ports

pub mod http_client;
pub mod listing_extractor;
pub mod partner_client;
pub mod property_store;
pub mod registry_client;

pub use listing_extractor::HtmlListingExtractor;
pub use partner_client::PartnerApiClient;
pub use property_store::{PropertyRecord, SqlitePropertyStore};
pub use registry_client::SparqlRegistryClient;
