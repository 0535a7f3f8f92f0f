pub mod playlist;
pub mod user_data;

pub use playlist::*;
pub use user_data::*;
