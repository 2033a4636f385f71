pub mod brief;
pub mod cases;
pub mod events;
pub mod models;
pub mod runs;
pub mod script;
pub mod session;
pub mod settings;
pub mod spine;
