pub mod daemon;
pub mod task;
pub mod utils;
