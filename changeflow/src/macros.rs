//! Convenience macros for defining changesets.

/// Define a SQL-only changeset.
///
/// # Basic Usage
///
/// ```
/// use changeflow::sql_changeset;
///
/// sql_changeset!(CreateUsersTable, "1", "alice",
///     up: "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
///     down: "DROP TABLE users"
/// );
/// ```
///
/// This expands to a unit struct `CreateUsersTable` implementing
/// [`ChangeSet`](crate::changeset::ChangeSet). The `up` SQL is also the
/// changeset's checksum source, so editing it after it was applied fails the
/// next run.
///
/// # Multiple Statements
///
/// ```
/// use changeflow::sql_changeset;
///
/// sql_changeset!(InitialSchema, "1", "alice",
///     up: [
///         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
///         "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER, title TEXT)"
///     ],
///     down: [
///         "DROP TABLE posts",
///         "DROP TABLE users"
///     ]
/// );
/// ```
///
/// Omit `down` for forward-only changesets; rolling one back fails the run.
#[macro_export]
macro_rules! sql_changeset {
    ($name:ident, $id:expr, $author:expr,
        up: [$($up_sql:expr),+ $(,)?],
        down: [$($down_sql:expr),+ $(,)?]
    ) => {
        $crate::__sql_changeset_impl!($name, $id, $author, up: [$($up_sql),+]);

        impl $name {
            fn __down(
                tx: &$crate::sqlite::rusqlite::Transaction,
            ) -> ::std::result::Result<(), $crate::Error> {
                $(tx.execute_batch($down_sql)?;)+
                Ok(())
            }
        }
    };

    ($name:ident, $id:expr, $author:expr,
        up: $up_sql:expr,
        down: $down_sql:expr
    ) => {
        $crate::sql_changeset!($name, $id, $author, up: [$up_sql], down: [$down_sql]);
    };

    ($name:ident, $id:expr, $author:expr,
        up: [$($up_sql:expr),+ $(,)?]
    ) => {
        $crate::__sql_changeset_impl!($name, $id, $author, up: [$($up_sql),+]);

        impl $name {
            fn __down(
                _tx: &$crate::sqlite::rusqlite::Transaction,
            ) -> ::std::result::Result<(), $crate::Error> {
                Err($crate::Error::Engine(format!(
                    "changeset {} by {} does not support rollback",
                    $id, $author
                )))
            }
        }
    };

    ($name:ident, $id:expr, $author:expr,
        up: $up_sql:expr
    ) => {
        $crate::sql_changeset!($name, $id, $author, up: [$up_sql]);
    };
}

/// Internal implementation macro.
#[macro_export]
#[doc(hidden)]
macro_rules! __sql_changeset_impl {
    ($name:ident, $id:expr, $author:expr, up: [$($up_sql:expr),+]) => {
        pub struct $name;

        impl $crate::changeset::ChangeSet for $name {
            fn id(&self) -> String {
                $id.to_string()
            }

            fn author(&self) -> String {
                $author.to_string()
            }

            fn checksum_source(
                &self,
                _resources: &dyn $crate::engine::ResourceAccessor,
            ) -> ::std::result::Result<String, $crate::Error> {
                Ok([$($up_sql),+].join("\n"))
            }

            fn sqlite_up(
                &self,
                tx: &$crate::sqlite::rusqlite::Transaction,
                _resources: &dyn $crate::engine::ResourceAccessor,
            ) -> ::std::result::Result<(), $crate::Error> {
                $(tx.execute_batch($up_sql)?;)+
                Ok(())
            }

            fn sqlite_down(
                &self,
                tx: &$crate::sqlite::rusqlite::Transaction,
                _resources: &dyn $crate::engine::ResourceAccessor,
            ) -> ::std::result::Result<(), $crate::Error> {
                $name::__down(tx)
            }
        }
    };
}
