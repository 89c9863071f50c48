//! Worker tasks that touch chunk volumes.

pub mod volume_copy_task;

pub use volume_copy_task::{schedule_volume_copy, VolumeCopyTask};
