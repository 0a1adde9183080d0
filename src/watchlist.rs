use std::collections::{BTreeMap, HashSet};

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr,
};
use tracing::{debug, info, warn};

use crate::{
    cache::now_sec,
    entities::watchlist_item,
    error::{AppError, AppResult},
    models::{AddToWatchlistRequest, MediaType, WatchStatus},
    tmdb::RegionProviders,
};

pub const MAX_TITLE_LEN: usize = 200;

#[derive(Debug)]
pub enum AddOutcome {
    Added(watchlist_item::Model),
    AlreadyPresent(watchlist_item::Model),
}

#[derive(Debug, Default)]
pub struct GroupedWatchlist {
    pub want_to_watch: Vec<watchlist_item::Model>,
    pub watching: Vec<watchlist_item::Model>,
    pub watched: Vec<watchlist_item::Model>,
}

impl GroupedWatchlist {
    pub fn group(&self, status: WatchStatus) -> &[watchlist_item::Model] {
        match status {
            WatchStatus::WantToWatch => &self.want_to_watch,
            WatchStatus::Watching => &self.watching,
            WatchStatus::Watched => &self.watched,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.want_to_watch.is_empty() && self.watching.is_empty() && self.watched.is_empty()
    }
}

/// Changes accepted by the update form. `None` leaves a field untouched.
#[derive(Debug, Default)]
pub struct ItemUpdate {
    pub status: Option<WatchStatus>,
    pub rating: Option<Option<i32>>,
    pub notes: Option<String>,
}

impl ItemUpdate {
    /// Parses raw form values. An empty rating clears it.
    pub fn parse(
        status: Option<&str>,
        rating: Option<&str>,
        notes: Option<&str>,
    ) -> AppResult<Self> {
        let status = match status.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Some(s.parse::<WatchStatus>().map_err(AppError::BadRequest)?),
            None => None,
        };

        let rating = match rating.map(str::trim) {
            None => None,
            Some("") => Some(None),
            Some(raw) => {
                let value: i32 = raw
                    .parse()
                    .map_err(|_| AppError::bad_request("Rating must be a whole number."))?;
                if !(1..=10).contains(&value) {
                    return Err(AppError::bad_request("Rating must be between 1 and 10."));
                }
                Some(Some(value))
            },
        };

        Ok(Self { status, rating, notes: notes.map(|n| n.trim().to_string()) })
    }
}

pub async fn list_grouped(db: &DatabaseConnection, user_id: i32) -> AppResult<GroupedWatchlist> {
    let items = watchlist_item::Entity::find()
        .filter(watchlist_item::Column::UserId.eq(user_id))
        .order_by_desc(watchlist_item::Column::AddedDate)
        .order_by_desc(watchlist_item::Column::Id)
        .all(db)
        .await?;

    let mut grouped = GroupedWatchlist::default();
    for item in items {
        match item.status.parse::<WatchStatus>() {
            Ok(WatchStatus::WantToWatch) => grouped.want_to_watch.push(item),
            Ok(WatchStatus::Watching) => grouped.watching.push(item),
            Ok(WatchStatus::Watched) => grouped.watched.push(item),
            Err(err) => warn!(item_id = item.id, error = %err, "skipping item with unknown status"),
        }
    }
    Ok(grouped)
}

/// (tmdb id, media type) pairs on the user's watchlist.
pub async fn keys(db: &DatabaseConnection, user_id: i32) -> AppResult<HashSet<(i32, MediaType)>> {
    let rows: Vec<(i32, String)> = watchlist_item::Entity::find()
        .select_only()
        .column(watchlist_item::Column::TmdbId)
        .column(watchlist_item::Column::MediaType)
        .filter(watchlist_item::Column::UserId.eq(user_id))
        .into_tuple()
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(id, media)| media.parse::<MediaType>().ok().map(|m| (id, m)))
        .collect())
}

pub async fn add(
    db: &DatabaseConnection,
    user_id: i32,
    req: &AddToWatchlistRequest,
) -> AppResult<AddOutcome> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("Title is required."));
    }

    if let Some(item) = find_entry(db, user_id, req).await? {
        return Ok(AddOutcome::AlreadyPresent(item));
    }
    insert_entry(db, user_id, req, title).await
}

async fn find_entry(
    db: &DatabaseConnection,
    user_id: i32,
    req: &AddToWatchlistRequest,
) -> AppResult<Option<watchlist_item::Model>> {
    Ok(watchlist_item::Entity::find()
        .filter(watchlist_item::Column::UserId.eq(user_id))
        .filter(watchlist_item::Column::TmdbId.eq(req.tmdb_id))
        .filter(watchlist_item::Column::MediaType.eq(req.media_type.as_str()))
        .one(db)
        .await?)
}

/// Inserts a new entry. Losing a race against a concurrent add of the same
/// title reports the winner's row as already present.
async fn insert_entry(
    db: &DatabaseConnection,
    user_id: i32,
    req: &AddToWatchlistRequest,
    title: &str,
) -> AppResult<AddOutcome> {
    let model = watchlist_item::ActiveModel {
        user_id: Set(user_id),
        tmdb_id: Set(req.tmdb_id),
        media_type: Set(req.media_type.as_str().to_string()),
        title: Set(title.chars().take(MAX_TITLE_LEN).collect()),
        poster_path: Set(req.poster_path.clone().unwrap_or_default()),
        release_date: Set(req.release_date.clone().unwrap_or_default()),
        overview: Set(req.overview.clone().unwrap_or_default()),
        status: Set(WatchStatus::default().as_str().to_string()),
        rating: Set(None),
        notes: Set(String::new()),
        added_date: Set(now_sec()),
        watched_date: Set(None),
        available_providers: Set("{}".to_string()),
        last_provider_check: Set(None),
        ..Default::default()
    };

    match model.insert(db).await {
        Ok(item) => {
            info!(
                user_id = user_id,
                item_id = item.id,
                tmdb_id = item.tmdb_id,
                "added to watchlist"
            );
            Ok(AddOutcome::Added(item))
        },
        Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            debug!(user_id = user_id, tmdb_id = req.tmdb_id, "lost add race, keeping existing entry");
            match find_entry(db, user_id, req).await? {
                Some(item) => Ok(AddOutcome::AlreadyPresent(item)),
                None => Err(err.into()),
            }
        },
        Err(err) => Err(err.into()),
    }
}

async fn owned_item(
    db: &DatabaseConnection,
    user_id: i32,
    item_id: i32,
) -> AppResult<watchlist_item::Model> {
    watchlist_item::Entity::find_by_id(item_id)
        .filter(watchlist_item::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or(AppError::NotFound)
}

/// Deletes the item and returns its title.
pub async fn remove(db: &DatabaseConnection, user_id: i32, item_id: i32) -> AppResult<String> {
    let item = owned_item(db, user_id, item_id).await?;
    let title = item.title.clone();
    watchlist_item::Entity::delete_by_id(item.id).exec(db).await?;
    debug!(user_id = user_id, item_id = item_id, "removed from watchlist");
    Ok(title)
}

pub async fn update(
    db: &DatabaseConnection,
    user_id: i32,
    item_id: i32,
    changes: ItemUpdate,
) -> AppResult<watchlist_item::Model> {
    let item = owned_item(db, user_id, item_id).await?;
    let mut active = item.into_active_model();

    if let Some(status) = changes.status {
        active.status = Set(status.as_str().to_string());
        if status == WatchStatus::Watched {
            active.watched_date = Set(Some(now_sec()));
        }
    }
    if let Some(rating) = changes.rating {
        active.rating = Set(rating);
    }
    if let Some(notes) = changes.notes {
        active.notes = Set(notes);
    }

    Ok(active.update(db).await?)
}

/// Stores a region's provider slice on the item.
pub async fn record_providers(
    db: &DatabaseConnection,
    item: watchlist_item::Model,
    region: &str,
    providers: &RegionProviders,
) -> AppResult<watchlist_item::Model> {
    let mut snapshot = provider_snapshot(&item);
    snapshot.insert(region.to_string(), providers.clone());

    let mut active = item.into_active_model();
    active.available_providers = Set(serde_json::to_string(&snapshot)?);
    active.last_provider_check = Set(Some(now_sec()));
    Ok(active.update(db).await?)
}

/// The stored provider snapshot; an unreadable blob counts as empty.
pub fn provider_snapshot(item: &watchlist_item::Model) -> BTreeMap<String, RegionProviders> {
    serde_json::from_str(&item.available_providers).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{accounts, db, tmdb::Provider};

    async fn setup() -> (DatabaseConnection, i32, i32) {
        let db = db::connect_and_migrate("sqlite::memory:").await.unwrap();
        let alice = accounts::create_user(&db, "alice", "password1", "password1").await.unwrap();
        let bob = accounts::create_user(&db, "bob", "password2", "password2").await.unwrap();
        (db, alice.id, bob.id)
    }

    fn request(id: i32, media: MediaType, title: &str) -> AddToWatchlistRequest {
        AddToWatchlistRequest {
            tmdb_id: id,
            media_type: media,
            title: title.to_string(),
            poster_path: Some("/p.jpg".to_string()),
            release_date: None,
            overview: None,
        }
    }

    #[test]
    fn update_form_parsing() {
        let parsed = ItemUpdate::parse(Some("watched"), Some(" 9 "), Some(" loved it ")).unwrap();
        assert_eq!(parsed.status, Some(WatchStatus::Watched));
        assert_eq!(parsed.rating, Some(Some(9)));
        assert_eq!(parsed.notes.as_deref(), Some("loved it"));

        let cleared = ItemUpdate::parse(None, Some(""), None).unwrap();
        assert_eq!(cleared.status, None);
        assert_eq!(cleared.rating, Some(None));

        assert!(ItemUpdate::parse(Some("finished"), None, None).is_err());
        assert!(ItemUpdate::parse(None, Some("11"), None).is_err());
        assert!(ItemUpdate::parse(None, Some("great"), None).is_err());
    }

    #[tokio::test]
    async fn add_is_get_or_create_per_media_type() {
        let (db, alice, _) = setup().await;

        let first = add(&db, alice, &request(1396, MediaType::Tv, "Breaking Bad")).await.unwrap();
        let AddOutcome::Added(item) = first else { panic!("expected a new item") };
        assert_eq!(item.status, "want_to_watch");
        assert_eq!(item.poster_path, "/p.jpg");
        assert_eq!(item.available_providers, "{}");

        let again = add(&db, alice, &request(1396, MediaType::Tv, "Breaking Bad")).await.unwrap();
        assert!(matches!(again, AddOutcome::AlreadyPresent(ref i) if i.id == item.id));

        let movie = add(&db, alice, &request(1396, MediaType::Movie, "Other")).await.unwrap();
        assert!(matches!(movie, AddOutcome::Added(_)));

        assert_eq!(
            keys(&db, alice).await.unwrap(),
            HashSet::from([(1396, MediaType::Tv), (1396, MediaType::Movie)])
        );
        assert!(matches!(
            add(&db, alice, &request(5, MediaType::Movie, "  ")).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn losing_an_insert_race_reports_the_existing_entry() {
        let (db, alice, _) = setup().await;
        let req = request(93405, MediaType::Tv, "Squid Game");
        let AddOutcome::Added(winner) = add(&db, alice, &req).await.unwrap() else {
            panic!("expected a new item")
        };

        // A second writer that checked before the first insert landed.
        let late = insert_entry(&db, alice, &req, "Squid Game").await.unwrap();
        assert!(matches!(late, AddOutcome::AlreadyPresent(ref i) if i.id == winner.id));

        let req_a = request(66732, MediaType::Tv, "Stranger Things");
        let req_b = request(66732, MediaType::Tv, "Stranger Things");
        let (a, b) = tokio::join!(add(&db, alice, &req_a), add(&db, alice, &req_b));
        let added = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|outcome| matches!(outcome, AddOutcome::Added(_)))
            .count();
        assert_eq!(added, 1);
    }

    #[tokio::test]
    async fn items_are_private_to_their_owner() {
        let (db, alice, bob) = setup().await;
        let AddOutcome::Added(item) =
            add(&db, alice, &request(603, MediaType::Movie, "The Matrix")).await.unwrap()
        else {
            panic!("expected a new item")
        };

        assert!(matches!(remove(&db, bob, item.id).await, Err(AppError::NotFound)));
        assert!(matches!(
            update(&db, bob, item.id, ItemUpdate::default()).await,
            Err(AppError::NotFound)
        ));

        assert_eq!(remove(&db, alice, item.id).await.unwrap(), "The Matrix");
        assert!(list_grouped(&db, alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_updates_regroup_and_stamp_watched_date() {
        let (db, alice, _) = setup().await;
        for (id, title) in [(27205, "Inception"), (157336, "Interstellar")] {
            add(&db, alice, &request(id, MediaType::Movie, title)).await.unwrap();
        }
        let grouped = list_grouped(&db, alice).await.unwrap();
        assert_eq!(grouped.want_to_watch.len(), 2);
        assert_eq!(grouped.want_to_watch[0].title, "Interstellar");

        let target = grouped.want_to_watch[1].id;
        let watching = update(
            &db,
            alice,
            target,
            ItemUpdate { status: Some(WatchStatus::Watching), ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(watching.watched_date, None);

        let watched = update(
            &db,
            alice,
            target,
            ItemUpdate {
                status: Some(WatchStatus::Watched),
                rating: Some(Some(10)),
                notes: Some("dream within a dream".to_string()),
            },
        )
        .await
        .unwrap();
        assert!(watched.watched_date.is_some());
        assert_eq!(watched.rating, Some(10));

        let grouped = list_grouped(&db, alice).await.unwrap();
        assert_eq!(grouped.group(WatchStatus::Watched).len(), 1);
        assert_eq!(grouped.group(WatchStatus::Watched)[0].title, "Inception");
        assert!(grouped.group(WatchStatus::Watching).is_empty());
    }

    #[tokio::test]
    async fn provider_snapshot_is_kept_per_region() {
        let (db, alice, _) = setup().await;
        let AddOutcome::Added(item) =
            add(&db, alice, &request(66732, MediaType::Tv, "Stranger Things")).await.unwrap()
        else {
            panic!("expected a new item")
        };
        let providers = RegionProviders {
            link: None,
            flatrate: vec![Provider {
                provider_id: 8,
                provider_name: "Netflix".to_string(),
                logo_path: None,
                display_priority: 0,
            }],
            rent: vec![],
            buy: vec![],
        };

        let item = record_providers(&db, item, "US", &providers).await.unwrap();
        assert!(item.last_provider_check.is_some());
        let snapshot = provider_snapshot(&item);
        assert_eq!(snapshot["US"].flatrate[0].provider_name, "Netflix");
    }
}
