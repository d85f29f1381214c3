pub mod activity;
pub mod enrollment;
pub mod event;
pub mod lesson;
pub mod progress;
