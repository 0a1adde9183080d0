use std::collections::{BTreeSet, HashSet};

use crate::{
    models::{ContentCard, MediaType},
    tmdb::{CombinedCredits, RegionProviders},
};

/// Upper bound on titles detailed per media type in a people search.
pub const MAX_SHARED_RESULTS: usize = 20;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SearchScope {
    Movie,
    Tv,
    #[default]
    Both,
}

impl SearchScope {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "movie" => SearchScope::Movie,
            "tv" => SearchScope::Tv,
            _ => SearchScope::Both,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SearchScope::Movie => "movie",
            SearchScope::Tv => "tv",
            SearchScope::Both => "both",
        }
    }

    pub fn includes(self, media: MediaType) -> bool {
        matches!(
            (self, media),
            (SearchScope::Both, _)
                | (SearchScope::Movie, MediaType::Movie)
                | (SearchScope::Tv, MediaType::Tv)
        )
    }
}

/// Splits "Tom Hanks and Meg Ryan, Nora Ephron" into individual names.
pub fn parse_people_query(query: &str) -> Vec<String> {
    query
        .replace(" and ", ",")
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// One person's filmography reduced to id sets.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PersonCredits {
    pub movie_cast: BTreeSet<i32>,
    pub movie_directed: BTreeSet<i32>,
    pub tv_cast: BTreeSet<i32>,
}

impl PersonCredits {
    pub fn from_combined(credits: &CombinedCredits) -> Self {
        let mut out = PersonCredits::default();

        for entry in &credits.cast {
            let Some(id) = entry.id else { continue };
            match entry.media_type.as_deref() {
                Some("movie") => {
                    out.movie_cast.insert(id);
                },
                Some("tv") => {
                    out.tv_cast.insert(id);
                },
                _ => {},
            }
        }

        for entry in &credits.crew {
            let Some(id) = entry.id else { continue };
            if entry.media_type.as_deref() == Some("movie") && entry.job.as_deref() == Some("Director")
            {
                out.movie_directed.insert(id);
            }
        }

        out
    }

    pub fn movies(&self) -> BTreeSet<i32> {
        self.movie_cast.union(&self.movie_directed).copied().collect()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SharedCredits {
    pub movies: BTreeSet<i32>,
    pub tv: BTreeSet<i32>,
}

impl SharedCredits {
    pub fn is_empty(&self) -> bool {
        self.movies.is_empty() && self.tv.is_empty()
    }

    /// Ids to detail for `scope`, capped per media type.
    pub fn selected(&self, scope: SearchScope) -> Vec<(MediaType, i32)> {
        let mut out = Vec::new();
        if scope.includes(MediaType::Movie) {
            out.extend(self.movies.iter().take(MAX_SHARED_RESULTS).map(|id| (MediaType::Movie, *id)));
        }
        if scope.includes(MediaType::Tv) {
            out.extend(self.tv.iter().take(MAX_SHARED_RESULTS).map(|id| (MediaType::Tv, *id)));
        }
        out
    }
}

/// Titles every given person worked on. An empty input yields nothing.
pub fn shared_credits(people: &[PersonCredits]) -> SharedCredits {
    let Some((first, rest)) = people.split_first() else {
        return SharedCredits::default();
    };

    let mut shared = SharedCredits { movies: first.movies(), tv: first.tv_cast.clone() };
    for person in rest {
        let movies = person.movies();
        shared.movies.retain(|id| movies.contains(id));
        shared.tv.retain(|id| person.tv_cast.contains(id));
    }
    shared
}

/// Names of subscription providers for a title that the user subscribes to.
pub fn available_on_services(
    providers: Option<&RegionProviders>,
    user_service_ids: &HashSet<i32>,
) -> Vec<String> {
    if user_service_ids.is_empty() {
        return Vec::new();
    }
    providers
        .map(|p| {
            p.flatrate
                .iter()
                .filter(|provider| user_service_ids.contains(&provider.provider_id))
                .map(|provider| provider.provider_name.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Highest rated first; ties keep their original order.
pub fn rank_by_rating(results: &mut [ContentCard]) {
    results.sort_by(|a, b| b.vote_average.total_cmp(&a.vote_average));
}
