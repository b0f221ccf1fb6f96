pub mod convlog;
pub mod error;
pub mod persist;
pub mod replies;
pub mod router;
pub mod session;
pub mod store;
pub mod ticker;
pub mod timeparse;
