pub mod log_store;
pub mod maintenance;
pub mod naming;
pub mod retention;
pub mod traits;

pub use log_store::LogStore;
pub use maintenance::{run_maintenance_pass, spawn_maintenance_task, stopped, MaintenanceReport};
pub use retention::{RetentionError, RetentionManager, RetentionStats};
pub use traits::{LogTarget, StorageError};
