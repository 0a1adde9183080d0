use std::collections::HashSet;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{debug, info};

use crate::{
    cache::now_sec,
    entities::{session, streaming_service, user, user_streaming_service},
    error::{AppError, AppResult},
    tmdb::TmdbClient,
};

pub const MAX_USERNAME_LEN: usize = 150;
pub const MIN_PASSWORD_LEN: usize = 8;

/// Services offered on the profile page: (provider id, name, logo path).
pub const POPULAR_SERVICES: &[(i32, &str, &str)] = &[
    (8, "Netflix", "/t2yyOv40HZeVlLjYsCsPHnWLk4W.jpg"),
    (9, "Amazon Prime Video", "/emthp39XA2YScoYL1p0sdbAH2WA.jpg"),
    (15, "Hulu", "/zxrVdFjIjLqkfnwyghnfywTn3Lh.jpg"),
    (337, "Disney Plus", "/7rwgEs15tFwyR9NPQ5vpzxTj19Q.jpg"),
    (1899, "Max", "/6Q3ZYUNA9Hsgj6iWnVsw2gR5V6z.jpg"),
    (531, "Paramount Plus", "/xbhHHa1YgtpwhC8lb1NQ3ACVcLd.jpg"),
    (386, "Peacock", "/8VCV78prwd9QzZnEm0ReO6bERDa.jpg"),
    (350, "Apple TV Plus", "/6uhKBfmtzFqOcLousHwZuzcrScK.jpg"),
];

pub fn validate_username(username: &str) -> AppResult<()> {
    if username.is_empty() {
        return Err(AppError::bad_request("Username is required."));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(AppError::bad_request(format!(
            "Username must be at most {MAX_USERNAME_LEN} characters."
        )));
    }
    if !username.chars().all(|c| c.is_alphanumeric() || "@.+-_".contains(c)) {
        return Err(AppError::bad_request(
            "Username may contain only letters, digits and @/./+/-/_ characters.",
        ));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::Internal(anyhow::anyhow!("password hashing failed: {err}")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
    confirm: &str,
) -> AppResult<user::Model> {
    let username = username.trim();
    validate_username(username)?;

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters."
        )));
    }
    if password != confirm {
        return Err(AppError::bad_request("The two password fields didn't match."));
    }

    let taken = user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .one(db)
        .await?
        .is_some();
    if taken {
        return Err(AppError::bad_request("A user with that username already exists."));
    }

    let model = user::ActiveModel {
        username: Set(username.to_string()),
        password_hash: Set(hash_password(password)?),
        created_at: Set(now_sec()),
        ..Default::default()
    };
    let created = model.insert(db).await?;
    info!(user_id = created.id, username = %created.username, "user created");
    Ok(created)
}

pub async fn authenticate(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> AppResult<Option<user::Model>> {
    let found =
        user::Entity::find().filter(user::Column::Username.eq(username.trim())).one(db).await?;
    Ok(found.filter(|u| verify_password(password, &u.password_hash)))
}

pub async fn start_session(
    db: &DatabaseConnection,
    user_id: i32,
    ttl_days: i64,
) -> AppResult<session::Model> {
    let bytes: [u8; 32] = rand::rng().random();
    let now = now_sec();
    let model = session::ActiveModel {
        token: Set(hex::encode(bytes)),
        user_id: Set(user_id),
        created_at: Set(now),
        expires_at: Set(now + ttl_days.max(1) * 86_400),
    };
    Ok(model.insert(db).await?)
}

pub async fn session_user(db: &DatabaseConnection, token: &str) -> AppResult<Option<user::Model>> {
    let Some(sess) = session::Entity::find_by_id(token.to_string()).one(db).await? else {
        return Ok(None);
    };
    if sess.expires_at <= now_sec() {
        debug!(user_id = sess.user_id, "session expired");
        return Ok(None);
    }
    Ok(sess.find_related(user::Entity).one(db).await?)
}

pub async fn end_session(db: &DatabaseConnection, token: &str) -> AppResult<()> {
    session::Entity::delete_by_id(token.to_string()).exec(db).await?;
    Ok(())
}

pub async fn purge_expired_sessions(db: &DatabaseConnection) -> AppResult<u64> {
    let res = session::Entity::delete_many()
        .filter(session::Column::ExpiresAt.lte(now_sec()))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

pub async fn all_services(db: &DatabaseConnection) -> AppResult<Vec<streaming_service::Model>> {
    Ok(streaming_service::Entity::find()
        .order_by_asc(streaming_service::Column::Name)
        .all(db)
        .await?)
}

pub async fn user_services(
    db: &DatabaseConnection,
    user_id: i32,
) -> AppResult<Vec<streaming_service::Model>> {
    let Some(owner) = user::Entity::find_by_id(user_id).one(db).await? else {
        return Ok(Vec::new());
    };
    Ok(owner
        .find_related(streaming_service::Entity)
        .order_by_asc(streaming_service::Column::Name)
        .all(db)
        .await?)
}

/// Provider ids of the user's services, for availability matching.
pub async fn user_provider_ids(db: &DatabaseConnection, user_id: i32) -> AppResult<HashSet<i32>> {
    Ok(user_services(db, user_id).await?.into_iter().map(|s| s.provider_id).collect())
}

/// Replaces the user's services. Provider ids without a service row are ignored.
pub async fn set_user_services(
    db: &DatabaseConnection,
    user_id: i32,
    provider_ids: &[i32],
) -> AppResult<usize> {
    let services = if provider_ids.is_empty() {
        Vec::new()
    } else {
        streaming_service::Entity::find()
            .filter(streaming_service::Column::ProviderId.is_in(provider_ids.iter().copied()))
            .all(db)
            .await?
    };

    let txn = db.begin().await?;

    user_streaming_service::Entity::delete_many()
        .filter(user_streaming_service::Column::UserId.eq(user_id))
        .exec(&txn)
        .await?;

    for service in &services {
        let link = user_streaming_service::ActiveModel {
            user_id: Set(user_id),
            streaming_service_id: Set(service.id),
        };
        user_streaming_service::Entity::insert(link).exec(&txn).await?;
    }

    txn.commit().await?;

    debug!(user_id = user_id, linked = services.len(), "updated streaming services");
    Ok(services.len())
}

/// Inserts a service unless one with the same provider id exists.
/// Returns whether a row was created.
async fn get_or_create_service(
    db: &DatabaseConnection,
    provider_id: i32,
    name: &str,
    logo_path: &str,
) -> AppResult<bool> {
    let existing = streaming_service::Entity::find()
        .filter(streaming_service::Column::ProviderId.eq(provider_id))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(false);
    }

    streaming_service::ActiveModel {
        provider_id: Set(provider_id),
        name: Set(name.to_string()),
        logo_path: Set(logo_path.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(true)
}

#[derive(Debug, Default, Eq, PartialEq)]
pub struct SeedReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
}

/// Seeds the fixed list of popular services.
pub async fn seed_default_services(db: &DatabaseConnection) -> AppResult<SeedReport> {
    let mut report = SeedReport::default();
    for (provider_id, name, logo_path) in POPULAR_SERVICES {
        if get_or_create_service(db, *provider_id, name, logo_path).await? {
            report.created.push(name.to_string());
        } else {
            report.existing.push(name.to_string());
        }
    }
    Ok(report)
}

/// On an empty services table, seeds the popular services that the provider
/// catalog lists for `region`, with the catalog's names and logos.
pub async fn ensure_services_seeded(
    db: &DatabaseConnection,
    tmdb: &TmdbClient,
    region: &str,
) -> AppResult<usize> {
    if streaming_service::Entity::find().count(db).await? > 0 {
        return Ok(0);
    }

    let Some(catalog) = tmdb.providers_list(region).await else {
        debug!(region = %region, "provider catalog unavailable, services not seeded");
        return Ok(0);
    };

    let mut created = 0;
    for (provider_id, _, _) in POPULAR_SERVICES {
        let Some(provider) = catalog.results.iter().find(|p| p.provider_id == *provider_id) else {
            continue;
        };
        let logo = provider.logo_path.as_deref().unwrap_or_default();
        if get_or_create_service(db, provider.provider_id, &provider.provider_name, logo).await? {
            created += 1;
        }
    }

    info!(region = %region, created = created, "seeded streaming services from provider catalog");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{CacheManager, CacheTtl},
        db,
    };

    async fn db() -> DatabaseConnection {
        db::connect_and_migrate("sqlite::memory:").await.unwrap()
    }

    #[test]
    fn usernames_are_validated() {
        assert!(validate_username("meg.ryan+1@x").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("no spaces").is_err());
        assert!(validate_username(&"a".repeat(MAX_USERNAME_LEN + 1)).is_err());
    }

    #[test]
    fn password_hashes_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[tokio::test]
    async fn signup_rules() {
        let db = db().await;
        assert!(matches!(
            create_user(&db, "nora", "short", "short").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            create_user(&db, "nora", "sleepless1", "sleepless2").await,
            Err(AppError::BadRequest(_))
        ));

        let nora = create_user(&db, "  nora ", "sleepless1", "sleepless1").await.unwrap();
        assert_eq!(nora.username, "nora");
        assert!(matches!(
            create_user(&db, "nora", "sleepless1", "sleepless1").await,
            Err(AppError::BadRequest(_))
        ));

        assert_eq!(authenticate(&db, "nora", "sleepless1").await.unwrap().map(|u| u.id), Some(nora.id));
        assert!(authenticate(&db, "nora", "seattle").await.unwrap().is_none());
        assert!(authenticate(&db, "meg", "sleepless1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sessions_resolve_until_ended() {
        let db = db().await;
        let user = create_user(&db, "tom", "bigbigbig", "bigbigbig").await.unwrap();

        let sess = start_session(&db, user.id, 14).await.unwrap();
        assert_eq!(sess.token.len(), 64);
        assert_eq!(session_user(&db, &sess.token).await.unwrap().map(|u| u.id), Some(user.id));
        assert!(session_user(&db, "missing").await.unwrap().is_none());

        end_session(&db, &sess.token).await.unwrap();
        assert!(session_user(&db, &sess.token).await.unwrap().is_none());

        let stale = session::ActiveModel {
            token: Set("stale".to_string()),
            user_id: Set(user.id),
            created_at: Set(0),
            expires_at: Set(1),
        };
        stale.insert(&db).await.unwrap();
        assert!(session_user(&db, "stale").await.unwrap().is_none());
        assert_eq!(purge_expired_sessions(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let db = db().await;
        let first = seed_default_services(&db).await.unwrap();
        assert_eq!(first.created.len(), POPULAR_SERVICES.len());
        assert!(first.existing.is_empty());

        let second = seed_default_services(&db).await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.existing.len(), POPULAR_SERVICES.len());

        let names: Vec<_> = all_services(&db).await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names.first().map(String::as_str), Some("Amazon Prime Video"));
    }

    #[tokio::test]
    async fn user_services_are_replaced_and_unknown_ids_ignored() {
        let db = db().await;
        seed_default_services(&db).await.unwrap();
        let user = create_user(&db, "meg", "youvegotmail", "youvegotmail").await.unwrap();

        assert_eq!(set_user_services(&db, user.id, &[8, 337, 99999]).await.unwrap(), 2);
        assert_eq!(user_provider_ids(&db, user.id).await.unwrap(), HashSet::from([8, 337]));

        set_user_services(&db, user.id, &[15]).await.unwrap();
        let names: Vec<_> =
            user_services(&db, user.id).await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Hulu"]);

        set_user_services(&db, user.id, &[]).await.unwrap();
        assert!(user_services(&db, user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lazy_seed_uses_catalog_entries() {
        let db = db().await;
        let cache = CacheManager::new(db.clone());
        cache
            .put(
                "providers_list:US",
                r#"{"results":[
                    {"provider_id":8,"provider_name":"Netflix","logo_path":"/pbpMk2JmcoNnQwx5JGpXngfoWtp.jpg"},
                    {"provider_id":2,"provider_name":"Apple TV","logo_path":"/peURlLlr8jggOwK53fJ5wdQl05y.jpg"},
                    {"provider_id":337,"provider_name":"Disney Plus","logo_path":null}
                ]}"#,
                CacheTtl::Catalog,
            )
            .await
            .unwrap();
        let tmdb =
            TmdbClient::new(reqwest::Client::new(), String::new(), "http://127.0.0.1:9".into(), 5, cache);

        assert_eq!(ensure_services_seeded(&db, &tmdb, "US").await.unwrap(), 2);
        let services = all_services(&db).await.unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[1].logo_path, "/pbpMk2JmcoNnQwx5JGpXngfoWtp.jpg");

        assert_eq!(ensure_services_seeded(&db, &tmdb, "US").await.unwrap(), 0);
    }
}
