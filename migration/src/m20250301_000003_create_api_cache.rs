use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ApiCache::Table)
                    .if_not_exists()
                    .col(string(ApiCache::CacheKey).primary_key())
                    .col(text(ApiCache::Payload))
                    .col(big_integer(ApiCache::CachedAt))
                    .col(big_integer(ApiCache::ExpiresAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_api_cache_expires_at")
                    .table(ApiCache::Table)
                    .col(ApiCache::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(ApiCache::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum ApiCache {
    Table,
    CacheKey,
    Payload,
    CachedAt,
    ExpiresAt,
}
