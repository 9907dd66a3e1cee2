pub mod conf;
pub mod env;

pub use conf::{source_variables, Conf};
pub use env::Env;
