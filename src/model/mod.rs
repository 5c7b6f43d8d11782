pub mod api;
pub mod config;
pub mod credential;
pub mod platform;
pub mod session;

pub use config::*;
pub use credential::*;
pub use platform::*;
pub use session::*;
