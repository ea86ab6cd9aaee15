pub mod http_description_service;
pub mod jpeg_photo_store;
