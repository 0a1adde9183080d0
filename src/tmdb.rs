use std::{collections::HashMap, num::NonZeroU32, sync::Arc};

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, error, warn};

use crate::{
    cache::{CacheManager, CacheTtl, cache_key, id_list_param},
    models::MediaType,
};

const IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/";
const DETAIL_APPENDS: &str = "watch/providers,credits,recommendations";

pub const POSTER_SIZE: &str = "w500";
pub const PROFILE_SIZE: &str = "w185";
pub const LOGO_SIZE: &str = "w92";

/// Full image URL for a TMDb image path, `None` for a missing or empty path.
pub fn image_url(path: Option<&str>, size: &str) -> Option<String> {
    match path {
        Some(p) if !p.is_empty() => Some(format!("{IMAGE_BASE_URL}{size}{p}")),
        _ => None,
    }
}

/// TMDb client that answers from the response cache when it can.
///
/// Every lookup is fail-soft: transport, HTTP and decode errors are logged and
/// surface as `None`, so pages render without the missing data.
pub struct TmdbClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    cache: CacheManager,
}

impl TmdbClient {
    pub fn new(
        client: reqwest::Client,
        api_key: String,
        base_url: String,
        rps: u32,
        cache: CacheManager,
    ) -> Self {
        if api_key.trim().is_empty() {
            warn!("TMDB_API_KEY is not set; only cached catalog data will be served");
        }

        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(
            NonZeroU32::new(rps.max(1)).unwrap_or(NonZeroU32::MIN),
        )));
        Self { client, api_key, base_url, limiter, cache }
    }

    pub async fn search_multi(&self, query: &str, page: u32) -> Option<Paged<MediaItem>> {
        let key = cache_key("search_multi", &[query.to_string(), page.to_string()]);
        let params = [("query", query.to_string()), ("page", page.to_string())];
        self.cached(key, CacheTtl::Listing, "/search/multi", &params).await
    }

    pub async fn trending(&self, media: &str, window: &str) -> Option<Paged<MediaItem>> {
        let key = cache_key("trending", &[media, window]);
        self.cached(key, CacheTtl::Listing, &format!("/trending/{media}/{window}"), &[]).await
    }

    pub async fn discover(
        &self,
        media: MediaType,
        filter: &DiscoverFilter,
    ) -> Option<Paged<MediaItem>> {
        let region = filter.watch_region.clone().unwrap_or_default();
        let key = cache_key(
            &format!("discover_{media}"),
            &[
                id_list_param(&filter.with_cast),
                id_list_param(&filter.with_crew),
                id_list_param(&filter.with_watch_providers),
                region,
                filter.page.max(1).to_string(),
            ],
        );
        let params = filter.query_params(media);
        self.cached(key, CacheTtl::Listing, &format!("/discover/{media}"), &params).await
    }

    pub async fn search_person(&self, query: &str) -> Option<Paged<PersonResult>> {
        let key = cache_key("search_person", &[query]);
        let params = [("query", query.to_string())];
        self.cached(key, CacheTtl::Listing, "/search/person", &params).await
    }

    pub async fn movie_details(&self, movie_id: i32) -> Option<TitleDetailsResponse> {
        self.details(MediaType::Movie, movie_id).await
    }

    pub async fn tv_details(&self, tv_id: i32) -> Option<TitleDetailsResponse> {
        self.details(MediaType::Tv, tv_id).await
    }

    pub async fn details(&self, media: MediaType, id: i32) -> Option<TitleDetailsResponse> {
        let key = cache_key(media.as_str(), &[id.to_string()]);
        let params = [("append_to_response", DETAIL_APPENDS.to_string())];
        self.cached(key, CacheTtl::Detail, &format!("/{media}/{id}"), &params).await
    }

    pub async fn person_credits(&self, person_id: i32) -> Option<CombinedCredits> {
        let key = cache_key("person_credits", &[person_id.to_string()]);
        self.cached(key, CacheTtl::Detail, &format!("/person/{person_id}/combined_credits"), &[])
            .await
    }

    /// Providers for one title in one region. Only the region's slice is cached,
    /// and only when the region has an entry.
    pub async fn watch_providers(
        &self,
        media: MediaType,
        id: i32,
        region: &str,
    ) -> Option<RegionProviders> {
        let key = cache_key("providers", &[media.as_str().to_string(), id.to_string(), region.to_string()]);
        if let Some(hit) = self.cache_lookup(&key).await {
            return Some(hit);
        }

        let mut resp: WatchProvidersResponse =
            self.request(&format!("/{media}/{id}/watch/providers"), &[]).await?;
        let providers = resp.results.remove(region)?;
        self.cache_store(&key, &providers, CacheTtl::Detail).await;
        Some(providers)
    }

    pub async fn providers_list(&self, region: &str) -> Option<ProviderCatalog> {
        let key = cache_key("providers_list", &[region]);
        let params = [("watch_region", region.to_string())];
        self.cached(key, CacheTtl::Catalog, "/watch/providers/movie", &params).await
    }

    async fn cached<T>(
        &self,
        key: String,
        ttl: CacheTtl,
        path: &str,
        params: &[(&str, String)],
    ) -> Option<T>
    where
        T: DeserializeOwned + Serialize,
    {
        if let Some(hit) = self.cache_lookup(&key).await {
            return Some(hit);
        }

        let value: T = self.request(path, params).await?;
        self.cache_store(&key, &value, ttl).await;
        Some(value)
    }

    async fn cache_lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(value) => {
                    debug!(key = %key, "cache hit");
                    Some(value)
                },
                Err(err) => {
                    warn!(key = %key, error = %err, "discarding undecodable cache entry");
                    None
                },
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key = %key, error = %err, "cache read failed");
                None
            },
        }
    }

    async fn cache_store<T: Serialize>(&self, key: &str, value: &T, ttl: CacheTtl) {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to encode cache entry");
                return;
            },
        };
        if let Err(err) = self.cache.put(key, &payload, ttl).await {
            warn!(key = %key, error = %err, "cache write failed");
        }
    }

    async fn request<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Option<T> {
        if self.api_key.trim().is_empty() {
            error!(path = %path, "TMDb API key not configured");
            return None;
        }

        self.limiter.until_ready().await;

        match self.send(path, params).await {
            Ok(value) => Some(value),
            Err(err) => {
                error!(path = %path, error = %err, "TMDb API request failed");
                None
            },
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, reqwest::Error> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        debug!(path = %path, "calling TMDb");
        self.client
            .get(url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[derive(Clone, Debug, Default)]
pub struct DiscoverFilter {
    pub with_cast: Vec<i32>,
    pub with_crew: Vec<i32>,
    /// Matches titles streaming on any of these providers.
    pub with_watch_providers: Vec<i32>,
    pub watch_region: Option<String>,
    pub page: u32,
}

impl DiscoverFilter {
    fn query_params(&self, media: MediaType) -> Vec<(&'static str, String)> {
        let mut params = vec![("page", self.page.max(1).to_string())];
        let cast = id_list_param(&self.with_cast);
        let crew = id_list_param(&self.with_crew);

        match media {
            MediaType::Movie => {
                if !cast.is_empty() {
                    params.push(("with_cast", cast));
                }
                if !crew.is_empty() {
                    params.push(("with_crew", crew));
                }
            },
            // TV discovery has no cast/crew split.
            MediaType::Tv => {
                if !cast.is_empty() {
                    params.push(("with_people", cast));
                }
            },
        }

        if !self.with_watch_providers.is_empty() {
            let providers = id_list_param(&self.with_watch_providers).replace(',', "|");
            params.push(("with_watch_providers", providers));
            params.push(("with_watch_monetization_types", "flatrate".to_string()));
        }
        if let Some(region) = &self.watch_region {
            params.push(("watch_region", region.clone()));
        }
        params
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Paged<T> {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_results: u32,
}

/// A movie, show or person from search, trending, discover or recommendations.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MediaItem {
    pub id: i32,
    pub media_type: Option<String>,
    pub title: Option<String>,
    pub name: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    pub first_air_date: Option<String>,
    pub overview: Option<String>,
    #[serde(default)]
    pub vote_average: f64,
}

impl MediaItem {
    /// Media type from the payload, or `fallback` for endpoints that omit it.
    pub fn kind_or(&self, fallback: Option<MediaType>) -> Option<MediaType> {
        match &self.media_type {
            Some(kind) => kind.parse().ok(),
            None => fallback,
        }
    }

    pub fn display_title(&self) -> String {
        self.title.clone().or_else(|| self.name.clone()).unwrap_or_default()
    }

    pub fn date(&self) -> Option<String> {
        self.release_date.clone().or_else(|| self.first_air_date.clone()).filter(|d| !d.is_empty())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TitleDetailsResponse {
    pub id: i32,
    pub title: Option<String>,
    pub name: Option<String>,
    pub tagline: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    pub first_air_date: Option<String>,
    pub overview: Option<String>,
    #[serde(default)]
    pub vote_average: f64,
    pub runtime: Option<i32>,
    #[serde(default)]
    pub episode_run_time: Vec<i32>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    pub credits: Option<Credits>,
    #[serde(rename = "watch/providers")]
    pub watch_providers: Option<WatchProvidersResponse>,
    pub recommendations: Option<Paged<MediaItem>>,
}

impl TitleDetailsResponse {
    pub fn display_title(&self) -> String {
        self.title.clone().or_else(|| self.name.clone()).unwrap_or_default()
    }

    pub fn date(&self) -> Option<String> {
        self.release_date.clone().or_else(|| self.first_air_date.clone()).filter(|d| !d.is_empty())
    }

    pub fn runtime_minutes(&self) -> Option<i32> {
        self.runtime.filter(|m| *m > 0).or_else(|| self.episode_run_time.first().copied())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Genre {
    pub id: i32,
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Credits {
    #[serde(default)]
    pub cast: Vec<CastMember>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CastMember {
    pub name: String,
    pub character: Option<String>,
    pub profile_path: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WatchProvidersResponse {
    #[serde(default)]
    pub results: HashMap<String, RegionProviders>,
}

/// Where a title can be watched in one region, by monetization type.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RegionProviders {
    pub link: Option<String>,
    #[serde(default)]
    pub flatrate: Vec<Provider>,
    #[serde(default)]
    pub rent: Vec<Provider>,
    #[serde(default)]
    pub buy: Vec<Provider>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Provider {
    pub provider_id: i32,
    pub provider_name: String,
    pub logo_path: Option<String>,
    #[serde(default)]
    pub display_priority: i32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProviderCatalog {
    #[serde(default)]
    pub results: Vec<Provider>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PersonResult {
    pub id: i32,
    pub name: String,
    pub profile_path: Option<String>,
    pub known_for_department: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CombinedCredits {
    #[serde(default)]
    pub cast: Vec<CreditEntry>,
    #[serde(default)]
    pub crew: Vec<CreditEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreditEntry {
    pub id: Option<i32>,
    pub media_type: Option<String>,
    pub job: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        Json, Router,
        extract::{Path, Query, State},
        http::StatusCode,
        routing::get,
    };
    use sea_orm::{DatabaseConnection, EntityTrait};
    use serde_json::{Value, json};

    use super::*;
    use crate::{db, entities::api_cache};

    const TEST_KEY: &str = "test-key";

    type Hits = Arc<AtomicUsize>;
    type FakeReply = Result<Json<Value>, StatusCode>;

    fn authorized(hits: &Hits, params: &HashMap<String, String>) -> Result<(), StatusCode> {
        hits.fetch_add(1, Ordering::SeqCst);
        match params.get("api_key").map(String::as_str) {
            Some(TEST_KEY) => Ok(()),
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }

    async fn fake_search(
        State(hits): State<Hits>,
        Query(params): Query<HashMap<String, String>>,
    ) -> FakeReply {
        authorized(&hits, &params)?;
        let query = params.get("query").cloned().unwrap_or_default();
        Ok(Json(json!({
            "page": 1,
            "results": [{"id": 438631, "media_type": "movie", "title": query, "vote_average": 7.8}],
            "total_pages": 1,
            "total_results": 1
        })))
    }

    async fn fake_movie(
        State(hits): State<Hits>,
        Path(id): Path<i32>,
        Query(params): Query<HashMap<String, String>>,
    ) -> FakeReply {
        authorized(&hits, &params)?;
        if params.get("append_to_response").map(String::as_str) != Some(DETAIL_APPENDS) {
            return Err(StatusCode::BAD_REQUEST);
        }
        match id {
            550 => Ok(Json(json!({"id": 550, "title": "Fight Club", "vote_average": 8.4}))),
            _ => Err(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    async fn fake_providers(
        State(hits): State<Hits>,
        Query(params): Query<HashMap<String, String>>,
    ) -> FakeReply {
        authorized(&hits, &params)?;
        Ok(Json(json!({
            "id": 82856,
            "results": {"US": {"flatrate": [{"provider_id": 337, "provider_name": "Disney Plus"}]}}
        })))
    }

    async fn fake_catalog(
        State(hits): State<Hits>,
        Query(params): Query<HashMap<String, String>>,
    ) -> FakeReply {
        authorized(&hits, &params)?;
        if params.get("watch_region").map(String::as_str) != Some("US") {
            return Err(StatusCode::BAD_REQUEST);
        }
        Ok(Json(json!({"results": [{"provider_id": 8, "provider_name": "Netflix"}]})))
    }

    /// Serves a small slice of the TMDb API on a local port.
    async fn fake_tmdb() -> (String, Hits) {
        let hits = Hits::default();
        let app = Router::new()
            .route("/3/search/multi", get(fake_search))
            .route("/3/movie/{id}", get(fake_movie))
            .route("/3/tv/{id}/watch/providers", get(fake_providers))
            .route("/3/watch/providers/movie", get(fake_catalog))
            .with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/3"), hits)
    }

    async fn online_client(api_key: &str) -> (TmdbClient, DatabaseConnection, Hits) {
        let (base_url, hits) = fake_tmdb().await;
        let db = db::connect_and_migrate("sqlite::memory:").await.unwrap();
        let cache = CacheManager::new(db.clone());
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let client = TmdbClient::new(http, api_key.to_string(), base_url, 100, cache);
        (client, db, hits)
    }

    async fn stored_ttl(db: &DatabaseConnection, key: &str) -> Option<i64> {
        api_cache::Entity::find_by_id(key.to_string())
            .one(db)
            .await
            .unwrap()
            .map(|row| row.expires_at - row.cached_at)
    }

    async fn offline_client() -> (TmdbClient, CacheManager) {
        let db = db::connect_and_migrate("sqlite::memory:").await.unwrap();
        let cache = CacheManager::new(db);
        let client = TmdbClient::new(
            reqwest::Client::new(),
            String::new(),
            "http://127.0.0.1:9".to_string(),
            10,
            cache.clone(),
        );
        (client, cache)
    }

    #[test]
    fn image_urls() {
        assert_eq!(
            image_url(Some("/abc.jpg"), POSTER_SIZE).as_deref(),
            Some("https://image.tmdb.org/t/p/w500/abc.jpg")
        );
        assert_eq!(image_url(Some(""), POSTER_SIZE), None);
        assert_eq!(image_url(None, PROFILE_SIZE), None);
    }

    #[test]
    fn discover_params_follow_media_type() {
        let filter = DiscoverFilter {
            with_cast: vec![31, 2],
            with_crew: vec![488],
            with_watch_providers: vec![337, 8],
            watch_region: Some("US".to_string()),
            page: 0,
        };

        let movie = filter.query_params(MediaType::Movie);
        assert!(movie.contains(&("with_cast", "2,31".to_string())));
        assert!(movie.contains(&("with_crew", "488".to_string())));
        assert!(movie.contains(&("with_watch_providers", "8|337".to_string())));
        assert!(movie.contains(&("page", "1".to_string())));

        let tv = filter.query_params(MediaType::Tv);
        assert!(tv.contains(&("with_people", "2,31".to_string())));
        assert!(!tv.iter().any(|(k, _)| *k == "with_crew"));
    }

    #[test]
    fn detail_payload_decodes_appended_sections() {
        let raw = r#"{
            "id": 550, "title": "Fight Club", "vote_average": 8.4, "runtime": 139,
            "genres": [{"id": 18, "name": "Drama"}],
            "credits": {"cast": [{"name": "Edward Norton", "character": "The Narrator", "profile_path": null}]},
            "watch/providers": {"results": {"US": {"link": "https://x", "flatrate": [{"provider_id": 8, "provider_name": "Netflix", "logo_path": "/n.jpg"}]}}},
            "recommendations": {"page": 1, "results": [{"id": 807, "title": "Se7en"}]}
        }"#;
        let details: TitleDetailsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(details.display_title(), "Fight Club");
        assert_eq!(details.runtime_minutes(), Some(139));
        let us = &details.watch_providers.unwrap().results["US"];
        assert_eq!(us.flatrate[0].provider_id, 8);
        assert!(us.rent.is_empty());
        assert_eq!(details.recommendations.unwrap().results[0].display_title(), "Se7en");
    }

    #[tokio::test]
    async fn without_api_key_misses_are_none() {
        let (client, _) = offline_client().await;
        assert!(client.search_multi("dune", 1).await.is_none());
        assert!(client.watch_providers(MediaType::Movie, 438631, "US").await.is_none());
    }

    #[tokio::test]
    async fn cached_payload_is_served_until_expiry() {
        let (client, cache) = offline_client().await;
        let payload = r#"{"page":1,"results":[{"id":438631,"media_type":"movie","title":"Dune","vote_average":7.8}],"total_pages":1,"total_results":1}"#;
        cache.put("search_multi:dune:1", payload, CacheTtl::Listing).await.unwrap();

        let page = client.search_multi("dune", 1).await.unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].kind_or(None), Some(MediaType::Movie));
        assert!(client.search_multi("dune", 2).await.is_none());
    }

    #[tokio::test]
    async fn region_provider_slice_is_cached_by_region() {
        let (client, cache) = offline_client().await;
        let slice = RegionProviders {
            link: None,
            flatrate: vec![Provider {
                provider_id: 337,
                provider_name: "Disney Plus".to_string(),
                logo_path: None,
                display_priority: 1,
            }],
            rent: vec![],
            buy: vec![],
        };
        cache
            .put("providers:tv:82856:US", &serde_json::to_string(&slice).unwrap(), CacheTtl::Detail)
            .await
            .unwrap();

        let us = client.watch_providers(MediaType::Tv, 82856, "US").await.unwrap();
        assert_eq!(us.flatrate[0].provider_name, "Disney Plus");
        assert!(client.watch_providers(MediaType::Tv, 82856, "GB").await.is_none());
    }

    #[tokio::test]
    async fn misses_are_fetched_and_cached_with_their_ttl_class() {
        let (client, db, hits) = online_client(TEST_KEY).await;

        let page = client.search_multi("dune", 1).await.unwrap();
        assert_eq!(page.results[0].display_title(), "dune");
        assert_eq!(stored_ttl(&db, "search_multi:dune:1").await, Some(3_600));

        let details = client.movie_details(550).await.unwrap();
        assert_eq!(details.display_title(), "Fight Club");
        assert_eq!(stored_ttl(&db, "movie:550").await, Some(86_400));

        let catalog = client.providers_list("US").await.unwrap();
        assert_eq!(catalog.results[0].provider_name, "Netflix");
        assert_eq!(stored_ttl(&db, "providers_list:US").await, Some(604_800));

        let calls = hits.load(Ordering::SeqCst);
        client.search_multi("dune", 1).await.unwrap();
        client.movie_details(550).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), calls, "second lookups come from the cache");
    }

    #[tokio::test]
    async fn http_errors_are_none_and_not_cached() {
        let (client, db, hits) = online_client(TEST_KEY).await;

        assert!(client.movie_details(13).await.is_none());
        assert_eq!(stored_ttl(&db, "movie:13").await, None);
        assert!(client.movie_details(13).await.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn api_key_is_sent_as_query_parameter() {
        let (client, db, hits) = online_client("wrong-key").await;

        assert!(client.search_multi("dune", 1).await.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(stored_ttl(&db, "search_multi:dune:1").await, None);
    }

    #[tokio::test]
    async fn only_present_regions_are_cached() {
        let (client, db, _) = online_client(TEST_KEY).await;

        let us = client.watch_providers(MediaType::Tv, 82856, "US").await.unwrap();
        assert_eq!(us.flatrate[0].provider_id, 337);
        assert_eq!(stored_ttl(&db, "providers:tv:82856:US").await, Some(86_400));

        assert!(client.watch_providers(MediaType::Tv, 82856, "GB").await.is_none());
        assert_eq!(stored_ttl(&db, "providers:tv:82856:GB").await, None);
    }
}
