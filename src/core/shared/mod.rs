pub mod error;
pub mod keyed;
pub mod schema;
pub mod state;
#[cfg(test)]
pub mod test_utils;
pub mod utils;

pub use error::{DeskError, DeskResult};
pub use utils::{create_conn, run_migrations, DbPool};
