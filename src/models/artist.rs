//! Artist dimension entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

/// Artist record taken from the song catalog.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "artists")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub artist_id: String,

    pub name: String,

    pub location: Option<String>,

    #[sea_orm(column_type = "Double", nullable)]
    pub latitude: Option<f64>,

    #[sea_orm(column_type = "Double", nullable)]
    pub longitude: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
