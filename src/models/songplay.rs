//! Songplay fact entity model
//!
//! This module contains the SeaORM entity model for the songplays table,
//! one row per played song that could be matched against the catalog.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

/// Songplay fact row
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "songplays")]
pub struct Model {
    /// Surrogate key generated by the warehouse
    #[sea_orm(primary_key)]
    pub songplay_id: i32,

    /// References `time.start_time`
    pub start_time: Option<DateTime>,

    /// References `users.user_id`
    pub user_id: Option<i32>,

    pub level: Option<String>,

    /// References `songs.song_id`
    pub song_id: Option<String>,

    /// References `artists.artist_id`
    pub artist_id: Option<String>,

    pub session_id: i32,

    pub location: Option<String>,

    pub user_agent: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
