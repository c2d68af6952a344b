pub mod inventory;
pub mod sanitize;
