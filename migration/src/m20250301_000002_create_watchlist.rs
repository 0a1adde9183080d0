use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WatchlistItems::Table)
                    .if_not_exists()
                    .col(pk_auto(WatchlistItems::Id))
                    .col(integer(WatchlistItems::UserId))
                    .col(integer(WatchlistItems::TmdbId))
                    .col(string_len(WatchlistItems::MediaType, 10))
                    .col(string_len(WatchlistItems::Title, 200))
                    .col(string(WatchlistItems::PosterPath).default(""))
                    .col(string(WatchlistItems::ReleaseDate).default(""))
                    .col(text(WatchlistItems::Overview).default(""))
                    .col(string_len(WatchlistItems::Status, 20).default("want_to_watch"))
                    .col(integer_null(WatchlistItems::Rating))
                    .col(text(WatchlistItems::Notes).default(""))
                    .col(big_integer(WatchlistItems::AddedDate))
                    .col(big_integer_null(WatchlistItems::WatchedDate))
                    .col(text(WatchlistItems::AvailableProviders).default("{}"))
                    .col(big_integer_null(WatchlistItems::LastProviderCheck))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_watchlist_items_user")
                            .from(WatchlistItems::Table, WatchlistItems::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_watchlist_items_unique")
                    .table(WatchlistItems::Table)
                    .col(WatchlistItems::UserId)
                    .col(WatchlistItems::TmdbId)
                    .col(WatchlistItems::MediaType)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_watchlist_items_user_status")
                    .table(WatchlistItems::Table)
                    .col(WatchlistItems::UserId)
                    .col(WatchlistItems::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(WatchlistItems::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum WatchlistItems {
    Table,
    Id,
    UserId,
    TmdbId,
    MediaType,
    Title,
    PosterPath,
    ReleaseDate,
    Overview,
    Status,
    Rating,
    Notes,
    AddedDate,
    WatchedDate,
    AvailableProviders,
    LastProviderCheck,
}
