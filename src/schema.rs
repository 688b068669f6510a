//! Schema bootstrap for the CH-benCHmark analytical tables.
//!
//! Every statement is guarded by an existence check and no table references
//! another, so issuing the registry again after a partial failure only
//! creates what is still missing.

use crate::config::Dialect;
use crate::connect::SqlExecutor;
use crate::error::SchemaError;

/// One table of the registry: column definitions plus the key column that
/// carries the uniqueness constraint.
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    columns: &'static str,
    unique_key: &'static str,
}

impl TableDef {
    /// `CREATE TABLE IF NOT EXISTS` statement in `dialect`'s syntax.
    pub fn create_ddl(&self, dialect: Dialect) -> String {
        let constraint = match dialect {
            Dialect::MySql => format!("UNIQUE KEY ({})", self.unique_key),
            Dialect::Postgres => format!("UNIQUE ({})", self.unique_key),
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{},\n    {}\n)",
            self.name, self.columns, constraint
        )
    }

    pub fn drop_ddl(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.name)
    }
}

/// Tables created by [`create_all`], in issue order.
pub const TABLE_REGISTRY: [TableDef; 3] = [
    TableDef {
        name: "nation",
        columns: "    N_NATIONKEY BIGINT NULL,
    N_NAME CHAR(25) NULL,
    N_REGIONKEY BIGINT NULL,
    N_COMMENT VARCHAR(152)",
        unique_key: "N_NATIONKEY",
    },
    TableDef {
        name: "region",
        columns: "    R_REGIONKEY BIGINT NULL,
    R_NAME CHAR(25) NULL,
    R_COMMENT VARCHAR(152)",
        unique_key: "R_REGIONKEY",
    },
    TableDef {
        name: "supplier",
        columns: "    S_SUPPKEY BIGINT NULL,
    S_NAME CHAR(25) NULL,
    S_ADDRESS VARCHAR(40) NULL,
    S_NATIONKEY BIGINT NULL,
    S_PHONE CHAR(15) NULL,
    S_ACCTBAL DECIMAL(15, 2) NULL,
    S_COMMENT VARCHAR(101) NULL",
        unique_key: "S_SUPPKEY",
    },
];

/// Create every registry table that does not exist yet.
///
/// Stops at the first failing statement; tables created before it are kept.
pub async fn create_all<E: SqlExecutor + ?Sized>(
    conn: &mut E,
    dialect: Dialect,
) -> Result<(), SchemaError> {
    for table in &TABLE_REGISTRY {
        println!("creating {}", table.name);
        conn.execute(&table.create_ddl(dialect))
            .await
            .map_err(|source| SchemaError::Create {
                table: table.name,
                source,
            })?;
    }
    Ok(())
}

/// Drop every registry table that exists, in reverse issue order.
pub async fn drop_all<E: SqlExecutor + ?Sized>(conn: &mut E) -> Result<(), SchemaError> {
    for table in TABLE_REGISTRY.iter().rev() {
        println!("dropping {}", table.name);
        conn.execute(&table.drop_ddl())
            .await
            .map_err(|source| SchemaError::Drop {
                table: table.name,
                source,
            })?;
    }
    Ok(())
}
