//! SQL shipped inside the binary, oldest first

use sha2::{Digest, Sha256};

pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

impl Migration {
    /// Hex SHA-256 of the SQL, recorded in `schema_version` when applied
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(self.sql.as_bytes()))
    }
}

macro_rules! embed {
    ($id:literal) => {
        Migration {
            id: $id,
            sql: include_str!(concat!("../../migrations/", $id, ".sql")),
        }
    };
}

pub const MIGRATIONS: &[Migration] = &[embed!("001_audit_log"), embed!("002_modules")];
