pub mod auto_registrar;
pub mod camera_stats;
pub mod camera_supervisor;
pub mod camera_worker;
pub mod inference_pool;
pub mod pipeline_logger;
pub mod sighting_log;
