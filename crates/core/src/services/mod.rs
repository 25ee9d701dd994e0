pub mod backends;
pub mod image;
