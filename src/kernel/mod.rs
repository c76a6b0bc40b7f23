pub mod cancel;
pub mod controller;
pub mod event;
pub mod state;
pub mod telemetry;
pub mod time;
pub mod tools;
pub mod transcript;
