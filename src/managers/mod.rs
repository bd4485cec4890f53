// Smartmarks state managers
// Managers own in-memory state: the reconciled bookmark list and the realtime session driving it.

pub mod bookmark_store;
pub mod session_manager;
