use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub username: String,
    pub password_hash: String,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::watchlist_item::Entity")]
    WatchlistItem,
    #[sea_orm(has_many = "super::session::Entity")]
    Session,
    #[sea_orm(has_many = "super::user_streaming_service::Entity")]
    UserStreamingService,
}

impl Related<super::watchlist_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WatchlistItem.def()
    }
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::streaming_service::Entity> for Entity {
    fn to() -> RelationDef {
        super::user_streaming_service::Relation::StreamingService.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::user_streaming_service::Relation::User.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
