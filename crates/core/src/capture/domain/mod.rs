pub mod camera_config;
pub mod capture_source;
