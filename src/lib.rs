pub mod app;
pub mod audio;
pub mod config;
pub mod connectivity;
pub mod headset;
pub mod input;
pub mod library;
pub mod model;
pub mod nav;
pub mod pet;
pub mod queue;
pub mod status;
pub mod system;
pub mod ui;
