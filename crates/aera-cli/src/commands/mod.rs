pub mod common;
pub mod config;
pub mod list;
pub mod queue;
pub mod report;
pub mod session;
pub mod status;
pub mod sync;
pub mod update;
pub mod watch;

pub use config::run_config_init;
pub use list::run_list;
pub use queue::{run_queue, run_queue_clear_failed, run_queue_failed};
pub use report::{run_report, ReportArgs};
pub use session::{run_session_clear, run_session_import, run_session_status, SessionImportArgs};
pub use status::run_status;
pub use sync::run_sync;
pub use update::{run_update, UpdateArgs};
pub use watch::run_watch;
