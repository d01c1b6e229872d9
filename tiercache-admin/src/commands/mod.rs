pub mod data;
pub mod maintenance;

pub use data::*;
pub use maintenance::*;
