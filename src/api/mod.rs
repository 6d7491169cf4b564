pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod error;
pub mod fetch;
pub mod types;

pub use cache::ChatCacheKey;
pub use cached_client::CachedSkillMatchClient;
pub use client::SkillMatchClient;
pub use error::ApiError;
