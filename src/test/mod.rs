pub mod utils;

mod api;
mod tokens;
