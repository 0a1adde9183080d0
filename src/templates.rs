use maud::{DOCTYPE, Markup, PreEscaped, html};

use crate::{
    discovery::SearchScope,
    entities::{streaming_service, watchlist_item},
    models::{ContentCard, MediaType, PersonCard, ProviderBadge, TitleDetails, WatchStatus},
    tmdb::{LOGO_SIZE, POSTER_SIZE, image_url},
    watchlist::GroupedWatchlist,
};

const SCOPE_OPTIONS: [(SearchScope, &str); 3] = [
    (SearchScope::Both, "Movies & TV"),
    (SearchScope::Movie, "Movies"),
    (SearchScope::Tv, "TV shows"),
];

const TAILWIND_CDN: &str = "https://cdn.tailwindcss.com";

const WATCHLIST_SCRIPT: &str = r#"
document.addEventListener('click', async (event) => {
  const button = event.target.closest('[data-watchlist-add]');
  if (!button) return;
  button.disabled = true;
  const d = button.dataset;
  const res = await fetch('/watchlist/add', {
    method: 'POST',
    headers: { 'Content-Type': 'application/json' },
    body: JSON.stringify({
      tmdb_id: Number(d.tmdbId),
      media_type: d.mediaType,
      title: d.title,
      poster_path: d.posterPath || null,
      release_date: d.releaseDate || null,
      overview: d.overview || null,
    }),
  });
  if (res.redirected) {
    window.location = res.url;
    return;
  }
  const body = await res.json().catch(() => ({ message: 'Something went wrong' }));
  button.textContent = body.message;
});
"#;

/// Per-request page chrome: who is logged in and any pending flash message.
#[derive(Clone, Copy, Debug, Default)]
pub struct Chrome<'a> {
    pub username: Option<&'a str>,
    pub flash: Option<&'a str>,
}

pub fn home_page(chrome: Chrome<'_>, trending: &[ContentCard], on_services: &[ContentCard]) -> String {
    page(
        "What's Playing",
        chrome,
        html! {
            section {
                h1 class="text-3xl font-bold text-gray-900" { "Trending this week" }
                @if trending.is_empty() {
                    p class="mt-4 text-gray-600" { "Trending titles are unavailable right now." }
                } @else {
                    (card_grid(trending))
                }
            }
            @if !on_services.is_empty() {
                section class="mt-12" {
                    h2 class="text-2xl font-bold text-gray-900" { "Streaming on your services" }
                    (card_grid(on_services))
                }
            }
        },
    )
}

pub fn search_page(
    chrome: Chrome<'_>,
    query: &str,
    page_no: u32,
    total_pages: u32,
    results: &[ContentCard],
) -> String {
    page(
        "Search",
        chrome,
        html! {
            h1 class="text-3xl font-bold text-gray-900" { "Search" }
            form class="mt-6 flex gap-3" method="get" action="/search" {
                input class=(INPUT_CLASS) name="q" value=(query) placeholder="Movies and TV shows" autofocus;
                button class=(BUTTON_CLASS) type="submit" { "Search" }
            }

            @if !query.is_empty() {
                @if results.is_empty() {
                    p class="mt-8 text-gray-600" { "No movies or TV shows found for \"" (query) "\"." }
                } @else {
                    (card_grid(results))
                    (pagination(query, page_no, total_pages))
                }
            }
        },
    )
}

fn pagination(query: &str, page_no: u32, total_pages: u32) -> Markup {
    let link = |p: u32| format!("/search?q={}&page={}", urlencoding::encode(query), p);
    html! {
        @if total_pages > 1 {
            nav class="mt-8 flex items-center justify-between text-sm" {
                @if page_no > 1 {
                    a class="text-blue-600 hover:text-blue-800" href=(link(page_no - 1)) { "Previous" }
                } @else { span {} }
                span class="text-gray-500" { "Page " (page_no) " of " (total_pages) }
                @if page_no < total_pages {
                    a class="text-blue-600 hover:text-blue-800" href=(link(page_no + 1)) { "Next" }
                } @else { span {} }
            }
        }
    }
}

pub fn advanced_search_page(
    chrome: Chrome<'_>,
    people_query: &str,
    scope: SearchScope,
    people: &[PersonCard],
    unmatched: &[String],
    unavailable: &[String],
    results: &[ContentCard],
) -> String {
    page(
        "Advanced Search",
        chrome,
        html! {
            h1 class="text-3xl font-bold text-gray-900" { "Find titles by people" }
            p class="mt-2 text-gray-600" { "Separate names with commas or \"and\" to find what they made together." }
            form class="mt-6 flex flex-wrap gap-3" method="get" action="/advanced-search" {
                input class=(INPUT_CLASS) name="people" value=(people_query) placeholder="Tom Hanks and Meg Ryan";
                select class="rounded-md border border-gray-300 px-3 py-2" name="type" {
                    @for (option, label) in SCOPE_OPTIONS {
                        option value=(option.as_str()) selected[scope == option] { (label) }
                    }
                }
                button class=(BUTTON_CLASS) type="submit" { "Search" }
            }

            @if !people.is_empty() {
                div class="mt-8 flex flex-wrap gap-4" {
                    @for person in people {
                        div class="flex items-center gap-3 bg-white shadow rounded-lg p-3" {
                            @if let Some(url) = &person.profile_url {
                                img class="h-12 w-12 rounded-full object-cover" src=(url) alt=(person.name);
                            }
                            div {
                                p class="font-semibold text-gray-900" { (person.name) }
                                p class="text-xs text-gray-500" { (person.known_for_department) }
                            }
                        }
                    }
                }
            }
            @if !unmatched.is_empty() {
                p class="mt-4 text-sm text-amber-700" { "No match for: " (unmatched.join(", ")) }
            }
            @if !unavailable.is_empty() {
                p class="mt-2 text-sm text-red-700" {
                    "Couldn't load credits for: " (unavailable.join(", ")) ". Try again in a moment."
                }
            }

            @if !people_query.trim().is_empty() {
                @if results.is_empty() {
                    p class="mt-8 text-gray-600" { "No titles found with everyone listed." }
                } @else {
                    (card_grid(results))
                }
            }
        },
    )
}

pub fn title_page(chrome: Chrome<'_>, details: &TitleDetails) -> String {
    let card = &details.card;
    page(
        &card.title,
        chrome,
        html! {
            div class="grid gap-8 md:grid-cols-3" {
                div {
                    @if let Some(url) = &card.poster_url {
                        img class="w-full rounded-lg shadow" src=(url) alt=(card.title);
                    }
                }
                div class="md:col-span-2" {
                    h1 class="text-3xl font-bold text-gray-900" {
                        (card.title)
                        @if let Some(date) = &card.release_date {
                            span class="ml-2 font-normal text-gray-500" { "(" (year_of(date)) ")" }
                        }
                    }
                    @if let Some(tagline) = details.tagline.as_deref().filter(|t| !t.is_empty()) {
                        p class="mt-1 italic text-gray-500" { (tagline) }
                    }
                    p class="mt-2 text-sm text-gray-600" {
                        (card.media_type.label())
                        @if let Some(minutes) = details.runtime_minutes { " · " (minutes) " min" }
                        @if !details.genres.is_empty() { " · " (details.genres.join(", ")) }
                        @if card.vote_average > 0.0 { " · ★ " (format!("{:.1}", card.vote_average)) }
                    }
                    @if let Some(overview) = &card.overview {
                        p class="mt-4 text-gray-700" { (overview) }
                    }
                    div class="mt-4" { (watchlist_button(card)) }

                    (provider_row("Stream", &details.stream))
                    (provider_row("Rent", &details.rent))
                    (provider_row("Buy", &details.buy))
                    @if let Some(link) = &details.providers_link {
                        a class="mt-2 inline-block text-sm text-blue-600 hover:text-blue-800" href=(link) target="_blank" rel="noopener noreferrer" { "All watch options" }
                    }

                    @if !details.cast.is_empty() {
                        h2 class="mt-8 text-xl font-semibold text-gray-900" { "Top cast" }
                        ul class="mt-3 grid grid-cols-2 gap-2 text-sm" {
                            @for member in &details.cast {
                                li {
                                    span class="font-medium text-gray-900" { (member.name) }
                                    @if let Some(character) = member.character.as_deref().filter(|c| !c.is_empty()) {
                                        span class="text-gray-500" { " as " (character) }
                                    }
                                }
                            }
                        }
                    }
                }
            }

            @if !details.recommendations.is_empty() {
                section class="mt-12" {
                    h2 class="text-2xl font-bold text-gray-900" { "Recommendations" }
                    (card_grid(&details.recommendations))
                }
            }
        },
    )
}

fn provider_row(label: &str, providers: &[ProviderBadge]) -> Markup {
    html! {
        @if !providers.is_empty() {
            div class="mt-6" {
                h3 class="text-sm font-semibold text-gray-700" { (label) }
                div class="mt-2 flex flex-wrap gap-2" {
                    @for provider in providers {
                        span class=(if provider.on_user_services { "flex items-center gap-2 rounded-full bg-green-100 px-3 py-1 text-sm text-green-800" } else { "flex items-center gap-2 rounded-full bg-gray-100 px-3 py-1 text-sm text-gray-700" }) {
                            @if let Some(logo) = &provider.logo_url {
                                img class="h-5 w-5 rounded" src=(logo) alt="";
                            }
                            (provider.name)
                        }
                    }
                }
            }
        }
    }
}

pub fn signup_page(chrome: Chrome<'_>, username: &str, error: Option<&str>) -> String {
    page(
        "Sign up",
        chrome,
        html! {
            div class="max-w-md mx-auto bg-white shadow rounded-lg p-8" {
                h1 class="text-2xl font-bold text-gray-900" { "Create an account" }
                @if let Some(error) = error { p class="mt-4 text-sm text-red-600" { (error) } }
                form class="mt-6 space-y-4" method="post" action="/accounts/signup" {
                    (field("username", "Username", "text", username))
                    (field("password1", "Password", "password", ""))
                    (field("password2", "Confirm password", "password", ""))
                    button class=(BUTTON_CLASS) type="submit" { "Sign up" }
                }
                p class="mt-4 text-sm text-gray-600" {
                    "Already have an account? " a class="text-blue-600" href="/accounts/login" { "Log in" }
                }
            }
        },
    )
}

pub fn login_page(chrome: Chrome<'_>, username: &str, next: &str, error: Option<&str>) -> String {
    page(
        "Log in",
        chrome,
        html! {
            div class="max-w-md mx-auto bg-white shadow rounded-lg p-8" {
                h1 class="text-2xl font-bold text-gray-900" { "Log in" }
                @if let Some(error) = error { p class="mt-4 text-sm text-red-600" { (error) } }
                form class="mt-6 space-y-4" method="post" action="/accounts/login" {
                    input type="hidden" name="next" value=(next);
                    (field("username", "Username", "text", username))
                    (field("password", "Password", "password", ""))
                    button class=(BUTTON_CLASS) type="submit" { "Log in" }
                }
                p class="mt-4 text-sm text-gray-600" {
                    "New here? " a class="text-blue-600" href="/accounts/signup" { "Create an account" }
                }
            }
        },
    )
}

fn field(name: &str, label: &str, kind: &str, value: &str) -> Markup {
    html! {
        div {
            label class="block text-sm font-medium text-gray-700" for=(name) { (label) }
            input class=(INPUT_CLASS) type=(kind) name=(name) id=(name) value=(value) required;
        }
    }
}

pub fn profile_page(
    chrome: Chrome<'_>,
    all_services: &[streaming_service::Model],
    user_services: &[streaming_service::Model],
) -> String {
    page(
        "Profile",
        chrome,
        html! {
            div class="max-w-2xl mx-auto bg-white shadow rounded-lg p-8" {
                h1 class="text-2xl font-bold text-gray-900" { "Your streaming services" }
                p class="mt-2 text-gray-600" { "Pick the services you subscribe to and we'll point out what you can watch right away." }
                @if all_services.is_empty() {
                    p class="mt-6 text-gray-600" { "No streaming services are available yet." }
                } @else {
                    form class="mt-6" method="post" action="/accounts/profile" {
                        div class="grid gap-3 sm:grid-cols-2" {
                            @for service in all_services {
                                @let checked = user_services.iter().any(|s| s.id == service.id);
                                label class="flex items-center gap-3 rounded-md border border-gray-200 p-3" {
                                    input type="checkbox" name="services" value=(service.provider_id) checked[checked];
                                    @if let Some(logo) = image_url(Some(service.logo_path.as_str()), LOGO_SIZE) {
                                        img class="h-8 w-8 rounded" src=(logo) alt="";
                                    }
                                    span class="text-gray-900" { (service.name) }
                                }
                            }
                        }
                        button class=(format!("mt-6 {BUTTON_CLASS}")) type="submit" { "Save" }
                    }
                }
            }
        },
    )
}

pub fn watchlist_page(
    chrome: Chrome<'_>,
    grouped: &GroupedWatchlist,
    availability: &dyn Fn(&watchlist_item::Model) -> Vec<String>,
) -> String {
    page(
        "Watchlist",
        chrome,
        html! {
            h1 class="text-3xl font-bold text-gray-900" { "Your watchlist" }
            @if grouped.is_empty() {
                p class="mt-6 text-gray-600" {
                    "Nothing here yet. " a class="text-blue-600" href="/search" { "Find something to watch" } "."
                }
            }
            @for status in WatchStatus::ALL {
                @let items = grouped.group(status);
                @if !items.is_empty() {
                    section class="mt-10" {
                        h2 class="text-xl font-semibold text-gray-900" { (status.label()) " (" (items.len()) ")" }
                        div class="mt-4 space-y-4" {
                            @for item in items {
                                (watchlist_row(item, &availability(item)))
                            }
                        }
                    }
                }
            }
        },
    )
}

fn watchlist_row(item: &watchlist_item::Model, available: &[String]) -> Markup {
    let media = item.media_type.parse::<MediaType>().ok();
    html! {
        div class="bg-white shadow rounded-lg p-4 flex gap-4" {
            @if let Some(url) = image_url(Some(item.poster_path.as_str()), "w154") {
                img class="h-32 rounded" src=(url) alt=(item.title);
            }
            div class="flex-1" {
                h3 class="text-lg font-semibold text-gray-900" {
                    @if let Some(media) = media {
                        a class="hover:text-blue-700" href=(format!("/{}/{}", media, item.tmdb_id)) { (item.title) }
                        span class="ml-2 text-sm font-normal text-gray-500" { (media.label()) }
                    } @else {
                        (item.title)
                    }
                }
                p class="text-xs text-gray-500" {
                    "Added " (format_day(item.added_date))
                    @if let Some(watched) = item.watched_date { " · watched " (format_day(watched)) }
                }
                @if !available.is_empty() {
                    p class="mt-1 text-sm text-green-700" { "On your services: " (available.join(", ")) }
                }
                form class="mt-3 flex flex-wrap items-end gap-3" method="post" action=(format!("/watchlist/update/{}", item.id)) {
                    select class="rounded-md border border-gray-300 px-2 py-1 text-sm" name="status" {
                        @for status in WatchStatus::ALL {
                            option value=(status.as_str()) selected[item.status == status.as_str()] { (status.label()) }
                        }
                    }
                    input class="w-20 rounded-md border border-gray-300 px-2 py-1 text-sm" type="number" min="1" max="10" name="rating" placeholder="1-10" value=[item.rating];
                    input class="flex-1 rounded-md border border-gray-300 px-2 py-1 text-sm" name="notes" placeholder="Notes" value=(item.notes);
                    button class="rounded-md bg-blue-600 px-3 py-1 text-sm font-semibold text-white hover:bg-blue-700" type="submit" { "Update" }
                }
                form class="mt-2" method="post" action=(format!("/watchlist/remove/{}", item.id)) {
                    button class="text-sm text-red-600 hover:text-red-800" type="submit" { "Remove" }
                }
            }
        }
    }
}

pub fn error_page(message: &str) -> String {
    page(
        "Error",
        Chrome::default(),
        html! {
            div class="max-w-xl mx-auto bg-white shadow rounded-lg p-8" {
                h1 class="text-2xl font-bold text-gray-900" { "Error" }
                p class="mt-4 text-gray-700" { (message) }
                a class="mt-6 inline-block text-blue-600 hover:text-blue-800" href="/" { "Back" }
            }
        },
    )
}

const INPUT_CLASS: &str = "mt-1 w-full rounded-md border border-gray-300 px-3 py-2 focus:border-blue-500 focus:outline-none focus:ring-1 focus:ring-blue-500";
const BUTTON_CLASS: &str =
    "rounded-md bg-blue-600 px-4 py-2 font-semibold text-white hover:bg-blue-700";

fn page(title: &str, chrome: Chrome<'_>, body: Markup) -> String {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) " · What's Playing" }
                script src=(TAILWIND_CDN) {}
            }
            body class="min-h-screen bg-gray-50" {
                (nav(chrome))
                main class="max-w-6xl mx-auto px-6 py-10" {
                    @if let Some(flash) = chrome.flash {
                        div class="mb-6 rounded-md bg-green-50 border border-green-200 px-4 py-3 text-green-800" { (flash) }
                    }
                    (body)
                }
                script { (PreEscaped(WATCHLIST_SCRIPT)) }
            }
        }
    }
    .into_string()
}

fn nav(chrome: Chrome<'_>) -> Markup {
    html! {
        header class="bg-white shadow" {
            nav class="max-w-6xl mx-auto px-6 py-4 flex items-center gap-6 text-sm" {
                a class="text-lg font-bold text-gray-900" href="/" { "What's Playing" }
                a class="text-gray-600 hover:text-gray-900" href="/search" { "Search" }
                a class="text-gray-600 hover:text-gray-900" href="/advanced-search" { "By people" }
                div class="ml-auto flex items-center gap-4" {
                    @if let Some(username) = chrome.username {
                        a class="text-gray-600 hover:text-gray-900" href="/watchlist" { "Watchlist" }
                        a class="text-gray-600 hover:text-gray-900" href="/accounts/profile" { (username) }
                        form method="post" action="/accounts/logout" {
                            button class="text-gray-600 hover:text-gray-900" type="submit" { "Log out" }
                        }
                    } @else {
                        a class="text-gray-600 hover:text-gray-900" href="/accounts/login" { "Log in" }
                        a class="text-blue-600 hover:text-blue-800" href="/accounts/signup" { "Sign up" }
                    }
                }
            }
        }
    }
}

fn card_grid(cards: &[ContentCard]) -> Markup {
    html! {
        div class="mt-6 grid gap-6 sm:grid-cols-2 lg:grid-cols-4" {
            @for card in cards { (content_card(card)) }
        }
    }
}

fn content_card(card: &ContentCard) -> Markup {
    html! {
        div class="bg-white shadow rounded-lg overflow-hidden flex flex-col" {
            a href=(format!("/{}/{}", card.media_type, card.id)) {
                @if let Some(url) = &card.poster_url {
                    img class="w-full aspect-[2/3] object-cover" src=(url) alt=(card.title) loading="lazy";
                } @else {
                    div class="w-full aspect-[2/3] bg-gray-200" {}
                }
            }
            div class="p-4 flex-1 flex flex-col" {
                h3 class="font-semibold text-gray-900" {
                    a class="hover:text-blue-700" href=(format!("/{}/{}", card.media_type, card.id)) { (card.title) }
                }
                p class="text-xs text-gray-500" {
                    (card.media_type.label())
                    @if let Some(date) = &card.release_date { " · " (year_of(date)) }
                    @if card.vote_average > 0.0 { " · ★ " (format!("{:.1}", card.vote_average)) }
                }
                @if let Some(overview) = &card.overview {
                    p class="mt-2 text-sm text-gray-600" { (truncate(overview, 160)) }
                }
                @if !card.available_on_user_services.is_empty() {
                    p class="mt-2 text-sm font-medium text-green-700" { "On your services: " (card.available_on_user_services.join(", ")) }
                } @else if !card.streaming_on.is_empty() {
                    p class="mt-2 text-xs text-gray-500" { "Streaming on " (card.streaming_on.join(", ")) }
                }
                div class="mt-auto pt-3" { (watchlist_button(card)) }
            }
        }
    }
}

fn watchlist_button(card: &ContentCard) -> Markup {
    html! {
        @if card.in_watchlist {
            span class="text-sm text-gray-500" { "In your watchlist" }
        } @else {
            button class="text-sm font-semibold text-blue-600 hover:text-blue-800" type="button"
                data-watchlist-add
                data-tmdb-id=(card.id)
                data-media-type=(card.media_type.as_str())
                data-title=(card.title)
                data-poster-path=[card.poster_path.as_deref()]
                data-release-date=[card.release_date.as_deref()]
                data-overview=[card.overview.as_deref()] {
                "+ Add to watchlist"
            }
        }
    }
}

fn year_of(date: &str) -> &str {
    date.get(..4).unwrap_or(date)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

fn format_day(epoch_seconds: i64) -> String {
    jiff::Timestamp::from_second(epoch_seconds)
        .map(|ts| ts.strftime("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Poster URL at the size used for cards.
pub fn poster_url(path: Option<&str>) -> Option<String> {
    image_url(path, POSTER_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers() {
        assert_eq!(year_of("1999-03-31"), "1999");
        assert_eq!(year_of("19"), "19");
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long overview", 6), "a very…");
        assert_eq!(format_day(0), "1970-01-01");
    }

    #[test]
    fn flash_and_user_show_in_chrome() {
        let html = error_page("nope");
        assert!(html.contains("Log in"));

        let html = home_page(Chrome { username: Some("nora"), flash: Some("Welcome nora!") }, &[], &[]);
        assert!(html.contains("Welcome nora!"));
        assert!(html.contains("/accounts/logout"));
        assert!(html.contains("Trending titles are unavailable"));
    }

    #[test]
    fn advanced_search_keeps_scope_and_notices() {
        let html = advanced_search_page(
            Chrome::default(),
            "Nobody, Billy Crystal",
            SearchScope::Movie,
            &[],
            &["Nobody".to_string()],
            &["Billy Crystal".to_string()],
            &[],
        );
        assert!(html.contains(r#"<option value="movie" selected>Movies</option>"#));
        assert!(html.contains(r#"<option value="tv">TV shows</option>"#));
        assert!(html.contains("No match for: Nobody"));
        assert!(html.contains("load credits for: Billy Crystal"));
    }
}
