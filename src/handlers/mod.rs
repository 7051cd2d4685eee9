pub mod purchases;
pub mod sale;
