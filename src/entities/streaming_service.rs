use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "streaming_services")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub provider_id: i32,
    pub name: String,
    pub logo_path: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_streaming_service::Entity")]
    UserStreamingService,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        super::user_streaming_service::Relation::User.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::user_streaming_service::Relation::StreamingService.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
