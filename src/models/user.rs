//! User dimension entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

/// One row per distinct user attribute combination seen in the event logs.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Distribution key; not unique, a user changing level appears twice
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i32,

    pub first_name: Option<String>,

    pub last_name: Option<String>,

    pub gender: Option<String>,

    /// Subscription level, `free` or `paid`
    pub level: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
