pub mod api_cache;
pub mod session;
pub mod streaming_service;
pub mod user;
pub mod user_streaming_service;
pub mod watchlist_item;
