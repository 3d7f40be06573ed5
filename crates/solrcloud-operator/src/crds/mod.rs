pub mod backup;
pub mod cloud;
pub mod options;
