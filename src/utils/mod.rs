pub mod paths;
pub mod periodic;
