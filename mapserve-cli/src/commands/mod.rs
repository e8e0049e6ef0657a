//! CLI command implementations.

pub mod common;
pub mod files;
pub mod index;
pub mod maintain;
pub mod modes;
pub mod params;
pub mod route;
