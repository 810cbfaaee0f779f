pub mod action;
pub mod approval;
pub mod classify;
pub mod config;
pub mod error;
pub mod filter;
pub mod io;
pub mod lookup;
pub mod paths;
pub mod recipe;
pub mod signing;
pub mod store;
pub mod types;
pub mod workflow;

pub use error::{RecipeError, Result};
