use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user_streaming_services")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i32,
    #[sea_orm(primary_key, auto_increment = false)]
    pub streaming_service_id: i32,
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
    #[sea_orm(
        belongs_to = "super::streaming_service::Entity",
        from = "Column::StreamingServiceId",
        to = "super::streaming_service::Column::Id",
        on_delete = "Cascade"
    )]
    StreamingService,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::streaming_service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StreamingService.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
