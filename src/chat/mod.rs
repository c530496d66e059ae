pub mod direct;
pub mod store;
