use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::{entities::api_cache, error::AppResult};

/// Lifetime classes for cached catalog responses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheTtl {
    /// Search, trending and discover listings.
    Listing,
    /// Title details, credits and per-title providers.
    Detail,
    /// The provider catalog.
    Catalog,
}

impl CacheTtl {
    pub const fn seconds(self) -> i64 {
        match self {
            CacheTtl::Listing => 3_600,
            CacheTtl::Detail => 86_400,
            CacheTtl::Catalog => 604_800,
        }
    }
}

/// Builds a stable cache key from an endpoint name and its positional parameters.
pub fn cache_key<S: AsRef<str>>(endpoint: &str, params: &[S]) -> String {
    let mut key = String::from(endpoint);
    for param in params {
        key.push(':');
        key.push_str(param.as_ref());
    }
    key
}

/// Formats an id list for a cache key: sorted, deduplicated, comma separated.
pub fn id_list_param(ids: &[i32]) -> String {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",")
}

#[derive(Clone)]
pub struct CacheManager {
    db: DatabaseConnection,
}

impl CacheManager {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let row = api_cache::Entity::find_by_id(key.to_string()).one(&self.db).await?;
        let now = now_sec();
        Ok(row.filter(|r| is_fresh(r.expires_at, now)).map(|r| r.payload))
    }

    pub async fn put(&self, key: &str, payload: &str, ttl: CacheTtl) -> AppResult<()> {
        let now = now_sec();
        let model = api_cache::ActiveModel {
            cache_key: Set(key.to_string()),
            payload: Set(payload.to_string()),
            cached_at: Set(now),
            expires_at: Set(now + ttl.seconds()),
        };

        api_cache::Entity::insert(model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(api_cache::Column::CacheKey)
                    .update_columns([
                        api_cache::Column::Payload,
                        api_cache::Column::CachedAt,
                        api_cache::Column::ExpiresAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }

    pub async fn purge_expired(&self) -> AppResult<u64> {
        let res = api_cache::Entity::delete_many()
            .filter(api_cache::Column::ExpiresAt.lte(now_sec()))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected)
    }
}

fn is_fresh(expires_at: i64, now: i64) -> bool {
    now < expires_at
}

pub fn now_sec() -> i64 {
    jiff::Timestamp::now().as_second()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn cache() -> CacheManager {
        let db = db::connect_and_migrate("sqlite::memory:").await.unwrap();
        CacheManager::new(db)
    }

    #[test]
    fn ttl_classes() {
        assert_eq!(CacheTtl::Listing.seconds(), 60 * 60);
        assert_eq!(CacheTtl::Detail.seconds(), 24 * 60 * 60);
        assert_eq!(CacheTtl::Catalog.seconds(), 7 * 24 * 60 * 60);
    }

    #[test]
    fn key_joins_params_in_order() {
        assert_eq!(cache_key("search_multi", &["dune", "1"]), "search_multi:dune:1");
        assert_eq!(cache_key::<&str>("providers_list", &[]), "providers_list");
    }

    #[test]
    fn id_lists_are_order_independent() {
        assert_eq!(id_list_param(&[31, 2, 31, 17]), "2,17,31");
        assert_eq!(id_list_param(&[17, 31, 2]), id_list_param(&[2, 17, 31]));
        assert_eq!(id_list_param(&[]), "");
    }

    #[tokio::test]
    async fn put_then_get_returns_latest_payload() {
        let cache = cache().await;
        assert_eq!(cache.get("movie:550").await.unwrap(), None);

        cache.put("movie:550", r#"{"id":550}"#, CacheTtl::Detail).await.unwrap();
        cache.put("movie:550", r#"{"id":550,"title":"Fight Club"}"#, CacheTtl::Detail).await.unwrap();

        assert_eq!(
            cache.get("movie:550").await.unwrap().as_deref(),
            Some(r#"{"id":550,"title":"Fight Club"}"#)
        );
    }

    #[tokio::test]
    async fn expired_entries_are_misses_and_get_purged() {
        let cache = cache().await;
        let stale = api_cache::ActiveModel {
            cache_key: Set("trending:all:week".to_string()),
            payload: Set("{}".to_string()),
            cached_at: Set(now_sec() - 7_200),
            expires_at: Set(now_sec() - 3_600),
        };
        api_cache::Entity::insert(stale).exec(&cache.db).await.unwrap();
        cache.put("search_person:tom hanks", "{}", CacheTtl::Listing).await.unwrap();

        assert_eq!(cache.get("trending:all:week").await.unwrap(), None);
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(cache.get("search_person:tom hanks").await.unwrap().is_some());
    }
}
