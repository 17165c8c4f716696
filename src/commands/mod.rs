mod changes;
mod list;
mod reconcile;
mod scan;
mod start;
mod stop;
mod validate;

pub use changes::run_changes;
pub use list::run_list;
pub use reconcile::run_reconcile;
pub use scan::run_scan;
pub use start::run_start;
pub use stop::run_stop;
pub use validate::run_validate;
