use std::{collections::HashSet, sync::Arc};

use axum::{
    Json, Router,
    extract::{Form, Path, Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::{CookieJar, Form as MultiForm};
use futures::{StreamExt, stream};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::{
    AppState, accounts,
    auth::{self, CurrentUser, MaybeUser},
    discovery::{
        PersonCredits, SearchScope, available_on_services, parse_people_query, rank_by_rating,
        shared_credits,
    },
    entities::{user, watchlist_item},
    error::{AppError, AppResult},
    models::{
        AddToWatchlistRequest, AddToWatchlistResponse, AdvancedSearchQuery, CastCard, ContentCard,
        LoginForm, MediaType, PersonCard, ProviderBadge, SearchQuery, ServicesForm, SignupForm,
        TitleDetails, UpdateWatchlistForm,
    },
    templates::{self, Chrome},
    tmdb::{
        DiscoverFilter, LOGO_SIZE, MediaItem, PROFILE_SIZE, Provider, RegionProviders,
        TitleDetailsResponse, image_url,
    },
    watchlist::{self, AddOutcome, ItemUpdate},
};

const TRENDING_LIMIT: usize = 12;
const CAST_LIMIT: usize = 10;
const RECOMMENDATION_LIMIT: usize = 8;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/search", get(search))
        .route("/advanced-search", get(advanced_search))
        .route("/movie/{id}", get(movie_details))
        .route("/tv/{id}", get(tv_details))
        .route("/accounts/signup", get(signup_form).post(signup))
        .route("/accounts/login", get(login_form).post(login))
        .route("/accounts/logout", post(logout))
        .route("/accounts/profile", get(profile).post(update_services))
        .route("/watchlist", get(watchlist_index))
        .route("/watchlist/add", post(add_to_watchlist))
        .route("/watchlist/remove/{item_id}", post(remove_from_watchlist))
        .route("/watchlist/update/{item_id}", post(update_watchlist_item))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// What the current viewer already has: watchlist entries and subscribed providers.
#[derive(Debug, Default)]
struct Viewer {
    watchlist: HashSet<(i32, MediaType)>,
    services: HashSet<i32>,
}

impl Viewer {
    async fn load(state: &AppState, user: Option<&user::Model>) -> AppResult<Self> {
        let Some(user) = user else {
            return Ok(Self::default());
        };
        Ok(Self {
            watchlist: watchlist::keys(&state.db, user.id).await?,
            services: accounts::user_provider_ids(&state.db, user.id).await?,
        })
    }

    fn card(&self, item: &MediaItem, media: MediaType) -> ContentCard {
        ContentCard {
            id: item.id,
            title: item.display_title(),
            media_type: media,
            poster_url: templates::poster_url(item.poster_path.as_deref()),
            poster_path: item.poster_path.clone(),
            release_date: item.date(),
            overview: item.overview.clone().filter(|o| !o.is_empty()),
            in_watchlist: self.watchlist.contains(&(item.id, media)),
            streaming_on: Vec::new(),
            available_on_user_services: Vec::new(),
            vote_average: item.vote_average,
        }
    }

    fn details_card(&self, details: &TitleDetailsResponse, media: MediaType) -> ContentCard {
        ContentCard {
            id: details.id,
            title: details.display_title(),
            media_type: media,
            poster_url: templates::poster_url(details.poster_path.as_deref()),
            poster_path: details.poster_path.clone(),
            release_date: details.date(),
            overview: details.overview.clone().filter(|o| !o.is_empty()),
            in_watchlist: self.watchlist.contains(&(details.id, media)),
            streaming_on: Vec::new(),
            available_on_user_services: Vec::new(),
            vote_average: details.vote_average,
        }
    }

    fn apply_providers(&self, card: &mut ContentCard, providers: Option<&RegionProviders>) {
        card.available_on_user_services = available_on_services(providers, &self.services);
        card.streaming_on = providers
            .map(|p| p.flatrate.iter().map(|x| x.provider_name.clone()).collect())
            .unwrap_or_default();
    }

    fn badges(&self, providers: &[Provider]) -> Vec<ProviderBadge> {
        providers
            .iter()
            .map(|p| ProviderBadge {
                provider_id: p.provider_id,
                name: p.provider_name.clone(),
                logo_url: image_url(p.logo_path.as_deref(), LOGO_SIZE),
                on_user_services: self.services.contains(&p.provider_id),
            })
            .collect()
    }
}

/// Looks up regional providers for each card, bounded by `max_concurrent`.
async fn attach_providers(
    state: &AppState,
    viewer: &Viewer,
    cards: Vec<ContentCard>,
) -> Vec<ContentCard> {
    let region = state.config.watch_region.as_str();
    stream::iter(cards)
        .map(|mut card| async move {
            let providers = state.tmdb.watch_providers(card.media_type, card.id, region).await;
            viewer.apply_providers(&mut card, providers.as_ref());
            card
        })
        .buffered(state.config.max_concurrent.max(1))
        .collect()
        .await
}

fn chrome<'a>(user: &'a MaybeUser, flash: &'a Option<String>) -> Chrome<'a> {
    Chrome { username: user.username(), flash: flash.as_deref() }
}

pub async fn home(
    State(state): State<Arc<AppState>>,
    user: MaybeUser,
    jar: CookieJar,
) -> AppResult<(CookieJar, Html<String>)> {
    let (jar, flash) = auth::take_flash(jar);
    let viewer = Viewer::load(&state, user.0.as_ref()).await?;

    let trending: Vec<ContentCard> = state
        .tmdb
        .trending("all", "week")
        .await
        .map(|page| {
            page.results
                .iter()
                .take(TRENDING_LIMIT)
                .filter_map(|item| item.kind_or(None).map(|media| viewer.card(item, media)))
                .collect()
        })
        .unwrap_or_default();

    let mut on_services = Vec::new();
    if !viewer.services.is_empty() {
        let filter = DiscoverFilter {
            with_watch_providers: viewer.services.iter().copied().collect(),
            watch_region: Some(state.config.watch_region.clone()),
            page: 1,
            ..Default::default()
        };
        if let Some(page) = state.tmdb.discover(MediaType::Movie, &filter).await {
            on_services = page
                .results
                .iter()
                .take(TRENDING_LIMIT)
                .map(|item| viewer.card(item, MediaType::Movie))
                .collect();
        }
    }

    let body = templates::home_page(chrome(&user, &flash), &trending, &on_services);
    Ok((jar, Html(body)))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    user: MaybeUser,
    jar: CookieJar,
    Query(q): Query<SearchQuery>,
) -> AppResult<(CookieJar, Html<String>)> {
    let (jar, flash) = auth::take_flash(jar);
    let query = q.q.trim().to_string();
    let page_no = q.page.unwrap_or(1).max(1);
    let viewer = Viewer::load(&state, user.0.as_ref()).await?;

    let mut results = Vec::new();
    let mut total_pages = 0;
    if !query.is_empty() {
        if let Some(found) = state.tmdb.search_multi(&query, page_no).await {
            total_pages = found.total_pages;
            let cards = found
                .results
                .iter()
                .filter_map(|item| item.kind_or(None).map(|media| viewer.card(item, media)))
                .collect();
            results = attach_providers(&state, &viewer, cards).await;
        }
        debug!(query = %query, page = page_no, results = results.len(), "search");
    }

    let body =
        templates::search_page(chrome(&user, &flash), &query, page_no, total_pages, &results);
    Ok((jar, Html(body)))
}

pub async fn advanced_search(
    State(state): State<Arc<AppState>>,
    user: MaybeUser,
    jar: CookieJar,
    Query(q): Query<AdvancedSearchQuery>,
) -> AppResult<(CookieJar, Html<String>)> {
    let (jar, flash) = auth::take_flash(jar);
    let scope = SearchScope::parse(&q.search_type);
    let viewer = Viewer::load(&state, user.0.as_ref()).await?;

    let mut people = Vec::new();
    let mut unmatched = Vec::new();
    let mut unavailable = Vec::new();
    let mut credits = Vec::new();

    for name in parse_people_query(&q.people) {
        let Some(person) =
            state.tmdb.search_person(&name).await.and_then(|found| found.results.into_iter().next())
        else {
            unmatched.push(name);
            continue;
        };

        // Missing credits count as an empty filmography so the match stays strict.
        match state.tmdb.person_credits(person.id).await {
            Some(combined) => credits.push(PersonCredits::from_combined(&combined)),
            None => {
                warn!(person_id = person.id, "credits unavailable, nothing can be shared");
                credits.push(PersonCredits::default());
                unavailable.push(person.name.clone());
            },
        }

        people.push(PersonCard {
            id: person.id,
            name: person.name,
            profile_url: image_url(person.profile_path.as_deref(), PROFILE_SIZE),
            known_for_department: person
                .known_for_department
                .unwrap_or_else(|| "Acting".to_string()),
        });
    }

    let shared = shared_credits(&credits);
    debug!(
        people = people.len(),
        movies = shared.movies.len(),
        tv = shared.tv.len(),
        "shared credits"
    );

    let region = state.config.watch_region.as_str();
    let viewer_ref = &viewer;
    let state_ref = state.as_ref();
    let mut results: Vec<ContentCard> = stream::iter(shared.selected(scope))
        .map(|(media, id)| async move {
            let Some(details) = state_ref.tmdb.details(media, id).await else {
                warn!(media = %media, id, "details unavailable, title skipped");
                return None;
            };
            let mut card = viewer_ref.details_card(&details, media);
            let providers =
                details.watch_providers.as_ref().and_then(|w| w.results.get(region));
            viewer_ref.apply_providers(&mut card, providers);
            Some(card)
        })
        .buffered(state.config.max_concurrent.max(1))
        .filter_map(|card| async move { card })
        .collect()
        .await;

    rank_by_rating(&mut results);

    let body = templates::advanced_search_page(
        chrome(&user, &flash),
        &q.people,
        scope,
        &people,
        &unmatched,
        &unavailable,
        &results,
    );
    Ok((jar, Html(body)))
}

pub async fn movie_details(
    state: State<Arc<AppState>>,
    user: MaybeUser,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> AppResult<(CookieJar, Html<String>)> {
    title_details(state, user, jar, MediaType::Movie, id).await
}

pub async fn tv_details(
    state: State<Arc<AppState>>,
    user: MaybeUser,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> AppResult<(CookieJar, Html<String>)> {
    title_details(state, user, jar, MediaType::Tv, id).await
}

async fn title_details(
    State(state): State<Arc<AppState>>,
    user: MaybeUser,
    jar: CookieJar,
    media: MediaType,
    id: i32,
) -> AppResult<(CookieJar, Html<String>)> {
    let (jar, flash) = auth::take_flash(jar);
    let viewer = Viewer::load(&state, user.0.as_ref()).await?;
    let details = state.tmdb.details(media, id).await.ok_or(AppError::NotFound)?;

    let mut card = viewer.details_card(&details, media);
    let region_providers = details
        .watch_providers
        .as_ref()
        .and_then(|w| w.results.get(&state.config.watch_region));
    viewer.apply_providers(&mut card, region_providers);
    let empty = RegionProviders::default();
    let region_providers = region_providers.unwrap_or(&empty);

    let page = TitleDetails {
        tagline: details.tagline.clone(),
        runtime_minutes: details.runtime_minutes(),
        genres: details.genres.iter().map(|g| g.name.clone()).collect(),
        cast: details
            .credits
            .as_ref()
            .map(|c| {
                c.cast
                    .iter()
                    .take(CAST_LIMIT)
                    .map(|m| CastCard {
                        name: m.name.clone(),
                        character: m.character.clone(),
                        profile_url: image_url(m.profile_path.as_deref(), PROFILE_SIZE),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        stream: viewer.badges(&region_providers.flatrate),
        rent: viewer.badges(&region_providers.rent),
        buy: viewer.badges(&region_providers.buy),
        providers_link: region_providers.link.clone(),
        recommendations: details
            .recommendations
            .as_ref()
            .map(|r| {
                r.results
                    .iter()
                    .filter_map(|item| item.kind_or(Some(media)).map(|m| viewer.card(item, m)))
                    .take(RECOMMENDATION_LIMIT)
                    .collect()
            })
            .unwrap_or_default(),
        card,
    };

    Ok((jar, Html(templates::title_page(chrome(&user, &flash), &page))))
}

pub async fn signup_form(user: MaybeUser, jar: CookieJar) -> (CookieJar, Html<String>) {
    let (jar, flash) = auth::take_flash(jar);
    (jar, Html(templates::signup_page(chrome(&user, &flash), "", None)))
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<SignupForm>,
) -> AppResult<Response> {
    let created =
        accounts::create_user(&state.db, &form.username, &form.password1, &form.password2).await;
    let user = match created {
        Ok(user) => user,
        Err(AppError::BadRequest(msg)) => {
            let body =
                templates::signup_page(Chrome::default(), form.username.trim(), Some(msg.as_str()));
            return Ok(Html(body).into_response());
        },
        Err(err) => return Err(err),
    };

    let jar = start_session(&state, jar, &user).await?;
    let jar = auth::set_flash(jar, &format!("Welcome {}!", user.username));
    Ok((jar, Redirect::to("/accounts/profile")).into_response())
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    next: Option<String>,
}

pub async fn login_form(
    user: MaybeUser,
    jar: CookieJar,
    Query(q): Query<LoginQuery>,
) -> (CookieJar, Html<String>) {
    let (jar, flash) = auth::take_flash(jar);
    let next = auth::safe_next(q.next.as_deref());
    (jar, Html(templates::login_page(chrome(&user, &flash), "", next, None)))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let next = auth::safe_next(form.next.as_deref()).to_string();
    let Some(user) = accounts::authenticate(&state.db, &form.username, &form.password).await?
    else {
        let body = templates::login_page(
            Chrome::default(),
            form.username.trim(),
            &next,
            Some("Please enter a correct username and password."),
        );
        return Ok(Html(body).into_response());
    };

    let jar = start_session(&state, jar, &user).await?;
    Ok((jar, Redirect::to(&next)).into_response())
}

async fn start_session(
    state: &AppState,
    jar: CookieJar,
    user: &user::Model,
) -> AppResult<CookieJar> {
    let ttl_days = state.config.session_ttl_days;
    let session = accounts::start_session(&state.db, user.id, ttl_days).await?;
    Ok(jar.add(auth::session_cookie(session.token, ttl_days, state.config.secure_cookies)))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Redirect)> {
    if let Some(cookie) = jar.get(auth::SESSION_COOKIE) {
        accounts::end_session(&state.db, cookie.value()).await?;
    }
    Ok((auth::clear_session(jar), Redirect::to("/")))
}

pub async fn profile(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> AppResult<(CookieJar, Html<String>)> {
    let (jar, flash) = auth::take_flash(jar);
    accounts::ensure_services_seeded(&state.db, &state.tmdb, &state.config.watch_region).await?;

    let all_services = accounts::all_services(&state.db).await?;
    let user_services = accounts::user_services(&state.db, user.id).await?;

    let chrome = Chrome { username: Some(user.username.as_str()), flash: flash.as_deref() };
    Ok((jar, Html(templates::profile_page(chrome, &all_services, &user_services))))
}

pub async fn update_services(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    MultiForm(form): MultiForm<ServicesForm>,
) -> AppResult<(CookieJar, Redirect)> {
    accounts::set_user_services(&state.db, user.id, &form.services).await?;
    let jar = auth::set_flash(jar, "Your streaming services have been updated!");
    Ok((jar, Redirect::to("/accounts/profile")))
}

pub async fn watchlist_index(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> AppResult<(CookieJar, Html<String>)> {
    let (jar, flash) = auth::take_flash(jar);
    let grouped = watchlist::list_grouped(&state.db, user.id).await?;
    let services = accounts::user_provider_ids(&state.db, user.id).await?;
    let region = state.config.watch_region.clone();

    let availability = |item: &watchlist_item::Model| {
        let snapshot = watchlist::provider_snapshot(item);
        available_on_services(snapshot.get(&region), &services)
    };

    let chrome = Chrome { username: Some(user.username.as_str()), flash: flash.as_deref() };
    Ok((jar, Html(templates::watchlist_page(chrome, &grouped, &availability))))
}

pub async fn add_to_watchlist(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Json(req): Json<AddToWatchlistRequest>,
) -> AppResult<(CookieJar, Json<AddToWatchlistResponse>)> {
    match watchlist::add(&state.db, user.id, &req).await? {
        AddOutcome::Added(item) => {
            let region = state.config.watch_region.as_str();
            let media = req.media_type;
            if let Some(providers) = state.tmdb.watch_providers(media, item.tmdb_id, region).await {
                let stored =
                    watchlist::record_providers(&state.db, item.clone(), region, &providers).await;
                if let Err(err) = stored {
                    warn!(item_id = item.id, error = %err, "failed to store provider snapshot");
                }
            }

            let jar = auth::set_flash(jar, &format!("{} added to your watchlist!", item.title));
            Ok((
                jar,
                Json(AddToWatchlistResponse { success: true, message: "Added to watchlist".into() }),
            ))
        },
        AddOutcome::AlreadyPresent(_) => Ok((
            jar,
            Json(AddToWatchlistResponse {
                success: false,
                message: "Already in watchlist".into(),
            }),
        )),
    }
}

pub async fn remove_from_watchlist(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path(item_id): Path<i32>,
) -> AppResult<(CookieJar, Redirect)> {
    let title = watchlist::remove(&state.db, user.id, item_id).await?;
    let jar = auth::set_flash(jar, &format!("{title} removed from your watchlist!"));
    Ok((jar, Redirect::to("/watchlist")))
}

pub async fn update_watchlist_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path(item_id): Path<i32>,
    Form(form): Form<UpdateWatchlistForm>,
) -> AppResult<(CookieJar, Redirect)> {
    let changes = match ItemUpdate::parse(
        form.status.as_deref(),
        form.rating.as_deref(),
        form.notes.as_deref(),
    ) {
        Ok(changes) => changes,
        Err(AppError::BadRequest(msg)) => {
            return Ok((auth::set_flash(jar, &msg), Redirect::to("/watchlist")));
        },
        Err(err) => return Err(err),
    };

    let item = watchlist::update(&state.db, user.id, item_id, changes).await?;
    let jar = auth::set_flash(jar, &format!("Status updated for {}", item.title));
    Ok((jar, Redirect::to("/watchlist")))
}
