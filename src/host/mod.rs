pub mod page;
pub mod relay;
