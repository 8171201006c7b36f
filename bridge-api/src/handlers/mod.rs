mod app;
mod health;
mod webhook;

pub use app::{add_routes, AppState};
