pub mod description;
pub mod name_generator;
pub mod photo_store;
