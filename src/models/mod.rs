pub mod collaborators;
pub mod error;
pub mod health;
pub mod messages;
pub mod ready;

pub use collaborators::*;
pub use error::*;
pub use health::*;
pub use messages::*;
pub use ready::*;
