pub mod handler;
pub mod hub;
pub mod room;
pub mod session;

pub use hub::{spawn_sweeper, HubConfig, RoomHub};
