pub mod discovery;
pub mod exchange;
pub mod resolver;
pub mod wait;
