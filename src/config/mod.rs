pub mod env;
pub mod sizing;
pub mod db;

pub use env::*;
pub use sizing::*;
pub use db::*;
