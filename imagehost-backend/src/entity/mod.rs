pub mod image;

pub use image::Entity as Image;
