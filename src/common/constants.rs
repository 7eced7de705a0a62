/// Collaborator names used in errors, logs and metrics labels
pub const PARTNER: &str = "partner";
pub const REGISTRY: &str = "registry";
pub const LISTING: &str = "listing";

// Fixed confidence per source
pub const PARTNER_CONFIDENCE: f64 = 1.0;
pub const REGISTRY_CONFIDENCE: f64 = 0.9;

/// Outward-code prefixes treated as London when formatting registry addresses
pub const LONDON_PREFIXES: [&str; 7] = ["SW", "W", "E", "N", "S", "NW", "SE"];

pub const LONDON: &str = "London";

/// Words that mark a string as a plausible street address
pub const STREET_SUFFIXES: [&str; 24] = [
    "street", "road", "avenue", "lane", "drive", "close", "crescent", "square", "place",
    "gardens", "court", "terrace", "way", "walk", "grove", "mews", "hill", "row", "park",
    "gate", "yard", "wharf", "villas", "parade",
];

pub const DEFAULT_PIPELINE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 45;
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Scraped prices above this (in pounds) are treated as parse noise
pub const MAX_PLAUSIBLE_PRICE: i64 = 1_000_000_000;
