//! Time dimension entity model
//!
//! Each row breaks the timestamp of a `NextSong` event into calendar parts.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "time")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub start_time: DateTime,

    pub hour: i32,

    pub day: i32,

    /// ISO-8601 week number
    pub week: i32,

    pub month: i32,

    pub year: i32,

    /// Day of week, 0 = Sunday
    pub weekday: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
