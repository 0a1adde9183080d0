use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(pk_auto(Users::Id))
                    .col(string_uniq(Users::Username))
                    .col(string(Users::PasswordHash))
                    .col(big_integer(Users::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(StreamingServices::Table)
                    .if_not_exists()
                    .col(pk_auto(StreamingServices::Id))
                    .col(integer_uniq(StreamingServices::ProviderId))
                    .col(string(StreamingServices::Name))
                    .col(string(StreamingServices::LogoPath).default(""))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserStreamingServices::Table)
                    .if_not_exists()
                    .col(integer(UserStreamingServices::UserId))
                    .col(integer(UserStreamingServices::StreamingServiceId))
                    .primary_key(
                        Index::create()
                            .col(UserStreamingServices::UserId)
                            .col(UserStreamingServices::StreamingServiceId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_streaming_services_user")
                            .from(UserStreamingServices::Table, UserStreamingServices::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_streaming_services_service")
                            .from(
                                UserStreamingServices::Table,
                                UserStreamingServices::StreamingServiceId,
                            )
                            .to(StreamingServices::Table, StreamingServices::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Sessions::Table)
                    .if_not_exists()
                    .col(string(Sessions::Token).primary_key())
                    .col(integer(Sessions::UserId))
                    .col(big_integer(Sessions::CreatedAt))
                    .col(big_integer(Sessions::ExpiresAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sessions_user")
                            .from(Sessions::Table, Sessions::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sessions_expires_at")
                    .table(Sessions::Table)
                    .col(Sessions::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Sessions::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(UserStreamingServices::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(StreamingServices::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(Users::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Username,
    PasswordHash,
    CreatedAt,
}

#[derive(DeriveIden)]
enum StreamingServices {
    Table,
    Id,
    ProviderId,
    Name,
    LogoPath,
}

#[derive(DeriveIden)]
enum UserStreamingServices {
    Table,
    UserId,
    StreamingServiceId,
}

#[derive(DeriveIden)]
enum Sessions {
    Table,
    Token,
    UserId,
    CreatedAt,
    ExpiresAt,
}
