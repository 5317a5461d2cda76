pub mod instance;
pub mod property;
pub mod scene;
