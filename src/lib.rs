pub mod api;
pub mod auth;
pub mod cli;
pub mod host;
pub mod io;
pub mod model;
pub mod util;
