// Smartmarks services
// Services talk to collaborators: snapshot loading, change feeds, the backing stores, settings.

pub mod backend;
pub mod bookmark_actions;
pub mod change_feed;
pub mod local_backend;
pub mod rest_backend;
pub mod settings_engine;
pub mod snapshot_loader;
