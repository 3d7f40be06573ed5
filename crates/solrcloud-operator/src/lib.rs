pub mod cloud_controller;
pub mod config;
pub mod crds;
pub mod error;
pub mod resources;
