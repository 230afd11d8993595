pub mod config;
pub mod desired_state;
pub mod observability;
pub mod presets;
