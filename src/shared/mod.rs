pub mod ids;
pub mod logging;
pub mod run_ids;
pub mod time;
