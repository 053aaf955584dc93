pub mod collaborators;
pub mod health;

pub use collaborators::*;
pub use health::*;
