use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "watchlist_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub tmdb_id: i32,
    pub media_type: String,
    pub title: String,
    pub poster_path: String,
    pub release_date: String,
    #[sea_orm(column_type = "Text")]
    pub overview: String,
    pub status: String,
    pub rating: Option<i32>,
    #[sea_orm(column_type = "Text")]
    pub notes: String,
    pub added_date: i64,
    pub watched_date: Option<i64>,
    /// Region code to provider snapshot, serialized as JSON.
    #[sea_orm(column_type = "Text")]
    pub available_providers: String,
    pub last_provider_check: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
