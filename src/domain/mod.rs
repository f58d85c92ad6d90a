pub mod plant_state;
pub mod sample;
pub mod schedule;
pub mod types;

pub use plant_state::*;
pub use sample::*;
pub use schedule::*;
pub use types::*;
