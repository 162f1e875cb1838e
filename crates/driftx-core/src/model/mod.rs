pub mod module;
pub mod record;
pub mod schema;

pub use module::{ModuleDescriptor, ModuleMigrations};
pub use record::Record;
pub use schema::{ColumnDef, ColumnKind, TableSchema};
