//! # Data Models
//!
//! SeaORM entities for the five star-schema tables. The staging tables have
//! no entities; they are only written by the loader and read by SQL.

pub mod artist;
pub mod songplay;
pub mod song;
pub mod time;
pub mod user;

pub use artist::Entity as Artist;
pub use song::Entity as Song;
pub use songplay::Entity as Songplay;
pub use time::Entity as Time;
pub use user::Entity as User;
