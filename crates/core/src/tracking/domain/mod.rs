pub mod track;
pub mod track_buffer;
