pub mod relay;
pub mod settings;
pub mod stitch;
