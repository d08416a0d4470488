pub mod channel_cache_services;
pub mod channel_services;
pub mod fetch_services;
pub mod playlist_services;
pub mod refresh_services;
pub mod relay_services;

pub use channel_cache_services::DynChannelCacheService;
pub use channel_services::DynChannelService;
pub use fetch_services::DynFetchGateway;
pub use relay_services::RelayServices;
