pub mod cache;
pub mod pagination;
pub mod permissions;
