use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MediaType::Movie => "Movie",
            MediaType::Tv => "TV Show",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "tv" => Ok(MediaType::Tv),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    #[default]
    WantToWatch,
    Watching,
    Watched,
}

impl WatchStatus {
    pub const ALL: [WatchStatus; 3] =
        [WatchStatus::WantToWatch, WatchStatus::Watching, WatchStatus::Watched];

    pub fn as_str(self) -> &'static str {
        match self {
            WatchStatus::WantToWatch => "want_to_watch",
            WatchStatus::Watching => "watching",
            WatchStatus::Watched => "watched",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WatchStatus::WantToWatch => "Want to Watch",
            WatchStatus::Watching => "Watching",
            WatchStatus::Watched => "Watched",
        }
    }
}

impl FromStr for WatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WatchStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status: {s}"))
    }
}

/// A movie or show as rendered in result grids.
#[derive(Clone, Debug, Serialize)]
pub struct ContentCard {
    pub id: i32,
    pub title: String,
    pub media_type: MediaType,
    pub poster_url: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    pub overview: Option<String>,
    pub in_watchlist: bool,
    /// Subscription providers in the configured region.
    pub streaming_on: Vec<String>,
    pub available_on_user_services: Vec<String>,
    pub vote_average: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PersonCard {
    pub id: i32,
    pub name: String,
    pub profile_url: Option<String>,
    pub known_for_department: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CastCard {
    pub name: String,
    pub character: Option<String>,
    pub profile_url: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProviderBadge {
    pub provider_id: i32,
    pub name: String,
    pub logo_url: Option<String>,
    pub on_user_services: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct TitleDetails {
    pub card: ContentCard,
    pub tagline: Option<String>,
    pub runtime_minutes: Option<i32>,
    pub genres: Vec<String>,
    pub cast: Vec<CastCard>,
    pub stream: Vec<ProviderBadge>,
    pub rent: Vec<ProviderBadge>,
    pub buy: Vec<ProviderBadge>,
    pub providers_link: Option<String>,
    pub recommendations: Vec<ContentCard>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AdvancedSearchQuery {
    #[serde(default)]
    pub people: String,
    #[serde(rename = "type", default)]
    pub search_type: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    pub username: String,
    pub password1: String,
    pub password2: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServicesForm {
    #[serde(default)]
    pub services: Vec<i32>,
}

#[derive(Debug, Deserialize)]
pub struct AddToWatchlistRequest {
    pub tmdb_id: i32,
    pub media_type: MediaType,
    pub title: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddToWatchlistResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWatchlistForm {
    pub status: Option<String>,
    pub rating: Option<String>,
    pub notes: Option<String>,
}
