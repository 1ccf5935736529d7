//! SQL text generation for the key-value table.
//!
//! Bind order conventions, relied on by the store engine:
//! - upsert / insert: (key, value)
//! - fallback update: (value, key)
//! - point statements and `next_page`: (key)
//! - `delete_prefix`: (pattern from [`Dialect::prefix_pattern`])

use super::{Dialect, UpsertMode, KEY_PAGE_SIZE};

/// How a `put` is turned into SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertPlan {
    /// One statement that inserts or updates atomically.
    Native { sql: String },
    /// `INSERT`; on a key conflict the next attempt runs `update`, then
    /// `insert` again if the row was deleted in between.
    Fallback { insert: String, update: String },
}

impl UpsertPlan {
    #[must_use]
    pub fn is_native(&self) -> bool {
        matches!(self, UpsertPlan::Native { .. })
    }
}

/// Every statement a store issues, resolved once at open.
#[derive(Debug, Clone)]
pub struct Statements {
    pub create_table: String,
    pub upsert: UpsertPlan,
    /// Selects `value` and `updated_at` for one key.
    pub select_entry: String,
    /// Selects `count` of rows for one key.
    pub count_key: String,
    pub delete_key: String,
    pub delete_prefix: String,
    pub delete_all: String,
    /// Selects `count` of all rows.
    pub count_all: String,
    /// Selects `key` for the first page in key order.
    pub first_page: String,
    /// Selects `key` for the page after a bound key.
    pub next_page: String,
    /// `None` where the engine starts transactions implicitly.
    pub begin: Option<String>,
    pub commit: String,
    pub rollback: String,
    pub ping: String,
}

struct Names {
    table: String,
    key: String,
    value: String,
    updated_at: String,
}

impl Names {
    fn new(dialect: Dialect, table: &str) -> Self {
        Self {
            table: dialect.quote(table),
            key: dialect.quote("key"),
            value: dialect.quote("value"),
            updated_at: dialect.quote("updated_at"),
        }
    }
}

impl Statements {
    pub(crate) fn build(dialect: Dialect, table: &str, mode: UpsertMode) -> Self {
        let n = Names::new(dialect, table);
        let p1 = dialect.placeholder(1);

        let count_key = format!(
            "SELECT COUNT(*) AS count FROM {} WHERE {} = {p1}",
            n.table, n.key
        );
        let count_all = match dialect {
            Dialect::Sqlserver => format!("SELECT COUNT_BIG(*) AS count FROM {}", n.table),
            _ => format!("SELECT COUNT(*) AS count FROM {}", n.table),
        };
        let escape = match dialect {
            Dialect::Sqlite => String::new(),
            _ => " ESCAPE '!'".to_string(),
        };
        let matcher = match dialect {
            Dialect::Sqlite => "GLOB",
            _ => "LIKE",
        };

        Self {
            create_table: create_table(dialect, table),
            upsert: upsert(dialect, table, mode),
            select_entry: format!(
                "SELECT {}, {} FROM {} WHERE {} = {p1}",
                n.value, n.updated_at, n.table, n.key
            ),
            count_key,
            delete_key: format!("DELETE FROM {} WHERE {} = {p1}", n.table, n.key),
            delete_prefix: format!(
                "DELETE FROM {} WHERE {} {matcher} {p1}{escape}",
                n.table, n.key
            ),
            delete_all: format!("DELETE FROM {}", n.table),
            count_all,
            first_page: key_page(dialect, &n, false),
            next_page: key_page(dialect, &n, true),
            begin: match dialect {
                Dialect::Sqlite => Some("BEGIN IMMEDIATE".to_string()),
                Dialect::Postgres => Some("BEGIN".to_string()),
                Dialect::Mysql => Some("START TRANSACTION".to_string()),
                Dialect::Sqlserver => Some("BEGIN TRANSACTION".to_string()),
                Dialect::Oracle => None,
            },
            commit: match dialect {
                Dialect::Sqlserver => "COMMIT TRANSACTION".to_string(),
                _ => "COMMIT".to_string(),
            },
            rollback: match dialect {
                Dialect::Sqlserver => "ROLLBACK TRANSACTION".to_string(),
                _ => "ROLLBACK".to_string(),
            },
            ping: match dialect {
                Dialect::Oracle => "SELECT 1 FROM DUAL".to_string(),
                _ => "SELECT 1".to_string(),
            },
        }
    }
}

pub(super) fn create_table(dialect: Dialect, table: &str) -> String {
    let n = Names::new(dialect, table);
    let max = dialect.max_key_len();
    match dialect {
        Dialect::Sqlite => format!(
            "CREATE TABLE IF NOT EXISTS {} ({} TEXT NOT NULL PRIMARY KEY, {} BLOB NOT NULL, {} TIMESTAMP NOT NULL)",
            n.table, n.key, n.value, n.updated_at
        ),
        Dialect::Postgres => format!(
            "CREATE TABLE IF NOT EXISTS {} ({} VARCHAR({max}) NOT NULL PRIMARY KEY, {} BYTEA NOT NULL, {} TIMESTAMP NOT NULL)",
            n.table, n.key, n.value, n.updated_at
        ),
        Dialect::Mysql => format!(
            "CREATE TABLE IF NOT EXISTS {} ({} VARCHAR({max}) NOT NULL PRIMARY KEY, {} LONGBLOB NOT NULL, {} DATETIME(6) NOT NULL) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin",
            n.table, n.key, n.value, n.updated_at
        ),
        Dialect::Oracle => format!(
            "CREATE TABLE {} ({} VARCHAR2({max} CHAR) NOT NULL PRIMARY KEY, {} BLOB NOT NULL, {} TIMESTAMP NOT NULL)",
            n.table, n.key, n.value, n.updated_at
        ),
        Dialect::Sqlserver => format!(
            "IF OBJECT_ID(N'{}', N'U') IS NULL CREATE TABLE {} ({} NVARCHAR({max}) COLLATE Latin1_General_BIN2 NOT NULL PRIMARY KEY, {} VARBINARY(MAX) NOT NULL, {} DATETIME2 NOT NULL)",
            table.replace('\'', "''"),
            n.table,
            n.key,
            n.value,
            n.updated_at
        ),
    }
}

pub(super) fn upsert(dialect: Dialect, table: &str, mode: UpsertMode) -> UpsertPlan {
    let n = Names::new(dialect, table);
    let (p1, p2) = (dialect.placeholder(1), dialect.placeholder(2));
    let now = dialect.now_utc();

    let native = match dialect {
        Dialect::Sqlite | Dialect::Postgres => Some(format!(
            "INSERT INTO {t} ({k}, {v}, {u}) VALUES ({p1}, {p2}, {now}) \
             ON CONFLICT ({k}) DO UPDATE SET {v} = excluded.{v}, {u} = excluded.{u}",
            t = n.table,
            k = n.key,
            v = n.value,
            u = n.updated_at
        )),
        Dialect::Mysql => Some(format!(
            "INSERT INTO {t} ({k}, {v}, {u}) VALUES ({p1}, {p2}, {now}) \
             ON DUPLICATE KEY UPDATE {v} = VALUES({v}), {u} = VALUES({u})",
            t = n.table,
            k = n.key,
            v = n.value,
            u = n.updated_at
        )),
        Dialect::Sqlserver => Some(format!(
            "MERGE {t} WITH (HOLDLOCK) AS target \
             USING (SELECT {p1} AS {k}, {p2} AS {v}) AS source ON target.{k} = source.{k} \
             WHEN MATCHED THEN UPDATE SET {v} = source.{v}, {u} = {now} \
             WHEN NOT MATCHED THEN INSERT ({k}, {v}, {u}) VALUES (source.{k}, source.{v}, {now});",
            t = n.table,
            k = n.key,
            v = n.value,
            u = n.updated_at
        )),
        // MERGE can still raise ORA-00001 under concurrent inserts.
        Dialect::Oracle => None,
    };

    match native {
        Some(sql) if mode == UpsertMode::Auto && dialect.has_native_upsert() => {
            UpsertPlan::Native { sql }
        }
        _ => UpsertPlan::Fallback {
            insert: format!(
                "INSERT INTO {} ({}, {}, {}) VALUES ({p1}, {p2}, {now})",
                n.table, n.key, n.value, n.updated_at
            ),
            update: format!(
                "UPDATE {} SET {} = {p1}, {} = {now} WHERE {} = {p2}",
                n.table, n.value, n.updated_at, n.key
            ),
        },
    }
}

fn key_page(dialect: Dialect, n: &Names, after: bool) -> String {
    let filter = if after {
        format!(" WHERE {} > {}", n.key, dialect.placeholder(1))
    } else {
        String::new()
    };
    match dialect {
        Dialect::Sqlserver => format!(
            "SELECT TOP ({KEY_PAGE_SIZE}) {k} FROM {t}{filter} ORDER BY {k}",
            k = n.key,
            t = n.table
        ),
        Dialect::Oracle => format!(
            "SELECT {k} FROM {t}{filter} ORDER BY {k} FETCH FIRST {KEY_PAGE_SIZE} ROWS ONLY",
            k = n.key,
            t = n.table
        ),
        _ => format!(
            "SELECT {k} FROM {t}{filter} ORDER BY {k} LIMIT {KEY_PAGE_SIZE}",
            k = n.key,
            t = n.table
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_upsert_uses_on_conflict() {
        let plan = Dialect::Sqlite.build_upsert("cache", UpsertMode::Auto);
        assert_eq!(
            plan,
            UpsertPlan::Native {
                sql: "INSERT INTO \"cache\" (\"key\", \"value\", \"updated_at\") VALUES (?, ?, CURRENT_TIMESTAMP) \
                      ON CONFLICT (\"key\") DO UPDATE SET \"value\" = excluded.\"value\", \"updated_at\" = excluded.\"updated_at\""
                    .to_string()
            }
        );
    }

    #[test]
    fn postgres_upsert_uses_numbered_placeholders() {
        let UpsertPlan::Native { sql } = Dialect::Postgres.build_upsert("kv", UpsertMode::Auto)
        else {
            panic!("postgres has a native upsert");
        };
        assert!(sql.contains("VALUES ($1, $2, (NOW() AT TIME ZONE 'UTC'))"));
        assert!(sql.contains("ON CONFLICT (\"key\") DO UPDATE"));
    }

    #[test]
    fn mysql_upsert_uses_on_duplicate_key() {
        let UpsertPlan::Native { sql } = Dialect::Mysql.build_upsert("kv", UpsertMode::Auto) else {
            panic!("mysql has a native upsert");
        };
        assert!(sql.starts_with("INSERT INTO `kv` (`key`, `value`, `updated_at`)"));
        assert!(sql.contains("ON DUPLICATE KEY UPDATE `value` = VALUES(`value`)"));
    }

    #[test]
    fn sqlserver_upsert_merges_with_holdlock() {
        let UpsertPlan::Native { sql } = Dialect::Sqlserver.build_upsert("kv", UpsertMode::Auto)
        else {
            panic!("sql server has a native upsert");
        };
        assert!(sql.starts_with("MERGE [kv] WITH (HOLDLOCK) AS target"));
        assert!(sql.contains("USING (SELECT @P1 AS [key], @P2 AS [value])"));
        assert!(sql.ends_with(';'));
    }

    #[test]
    fn oracle_always_falls_back() {
        let plan = Dialect::Oracle.build_upsert("kv", UpsertMode::Auto);
        let UpsertPlan::Fallback { insert, update } = plan else {
            panic!("oracle has no race-free native upsert");
        };
        assert_eq!(
            insert,
            "INSERT INTO \"kv\" (\"key\", \"value\", \"updated_at\") VALUES (:1, :2, SYS_EXTRACT_UTC(SYSTIMESTAMP))"
        );
        assert_eq!(
            update,
            "UPDATE \"kv\" SET \"value\" = :1, \"updated_at\" = SYS_EXTRACT_UTC(SYSTIMESTAMP) WHERE \"key\" = :2"
        );
    }

    #[test]
    fn fallback_mode_is_honoured_on_native_engines() {
        let plan = Dialect::Sqlite.build_upsert("kv", UpsertMode::Fallback);
        assert!(!plan.is_native());
    }

    #[test]
    fn create_table_is_conditional_where_supported() {
        for dialect in [Dialect::Sqlite, Dialect::Postgres, Dialect::Mysql] {
            let sql = dialect.build_create_table("kv");
            assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS"), "{dialect}: {sql}");
        }
        let mssql = Dialect::Sqlserver.build_create_table("kv");
        assert!(mssql.starts_with("IF OBJECT_ID(N'kv', N'U') IS NULL CREATE TABLE [kv]"));
        let oracle = Dialect::Oracle.build_create_table("kv");
        assert!(oracle.starts_with("CREATE TABLE \"kv\""));
    }

    #[test]
    fn create_table_sizes_key_column_to_limit() {
        assert!(Dialect::Mysql
            .build_create_table("kv")
            .contains("`key` VARCHAR(255) NOT NULL PRIMARY KEY"));
        assert!(Dialect::Sqlserver
            .build_create_table("kv")
            .contains("[key] NVARCHAR(450)"));
        assert!(Dialect::Oracle
            .build_create_table("kv")
            .contains("VARCHAR2(1000 CHAR)"));
    }

    #[test]
    fn key_pages_use_engine_row_limits() {
        let sqlite = Dialect::Sqlite.statements("kv", UpsertMode::Auto);
        assert_eq!(
            sqlite.first_page,
            "SELECT \"key\" FROM \"kv\" ORDER BY \"key\" LIMIT 256"
        );
        assert_eq!(
            sqlite.next_page,
            "SELECT \"key\" FROM \"kv\" WHERE \"key\" > ? ORDER BY \"key\" LIMIT 256"
        );

        let mssql = Dialect::Sqlserver.statements("kv", UpsertMode::Auto);
        assert_eq!(
            mssql.next_page,
            "SELECT TOP (256) [key] FROM [kv] WHERE [key] > @P1 ORDER BY [key]"
        );

        let oracle = Dialect::Oracle.statements("kv", UpsertMode::Auto);
        assert!(oracle.first_page.ends_with("FETCH FIRST 256 ROWS ONLY"));
    }

    #[test]
    fn prefix_delete_uses_glob_on_sqlite_and_like_elsewhere() {
        let sqlite = Dialect::Sqlite.statements("kv", UpsertMode::Auto);
        assert_eq!(
            sqlite.delete_prefix,
            "DELETE FROM \"kv\" WHERE \"key\" GLOB ?"
        );
        let pg = Dialect::Postgres.statements("kv", UpsertMode::Auto);
        assert_eq!(
            pg.delete_prefix,
            "DELETE FROM \"kv\" WHERE \"key\" LIKE $1 ESCAPE '!'"
        );
    }

    #[test]
    fn transaction_statements_per_engine() {
        let sqlite = Dialect::Sqlite.statements("kv", UpsertMode::Auto);
        assert_eq!(sqlite.begin.as_deref(), Some("BEGIN IMMEDIATE"));
        let oracle = Dialect::Oracle.statements("kv", UpsertMode::Auto);
        assert_eq!(oracle.begin, None);
        assert_eq!(oracle.ping, "SELECT 1 FROM DUAL");
        let mssql = Dialect::Sqlserver.statements("kv", UpsertMode::Auto);
        assert_eq!(mssql.rollback, "ROLLBACK TRANSACTION");
        assert!(mssql.count_all.contains("COUNT_BIG(*)"));
    }
}
