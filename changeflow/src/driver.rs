//! The embedded driver catalog.
//!
//! Maps human-facing database engine names to the driver class identifiers
//! handed to the database connector. The catalog is fixed; callers that need
//! another driver supply it as an explicit override instead.

use serde::Serialize;

/// A single catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmbeddedDriver {
    display_name: &'static str,
    driver_class_name: &'static str,
}

impl EmbeddedDriver {
    const fn new(display_name: &'static str, driver_class_name: &'static str) -> Self {
        Self {
            display_name,
            driver_class_name,
        }
    }

    pub fn display_name(&self) -> &'static str {
        self.display_name
    }

    pub fn driver_class_name(&self) -> &'static str {
        self.driver_class_name
    }
}

static EMBEDDED_DRIVERS: [EmbeddedDriver; 5] = [
    EmbeddedDriver::new("MySQL", "com.mysql.jdbc.Driver"),
    EmbeddedDriver::new("PostgreSQL", "org.postgresql.Driver"),
    EmbeddedDriver::new("Hypersonic SQL", "org.hsqldb.jdbc.JDBCDriver"),
    EmbeddedDriver::new("H2", "org.h2.Driver"),
    EmbeddedDriver::new("SQLite", "org.sqlite.JDBC"),
];

/// All catalog entries, in their fixed order.
pub fn all() -> &'static [EmbeddedDriver] {
    &EMBEDDED_DRIVERS
}

/// Look up the driver class for `engine_name`.
///
/// Matching is exact and case-sensitive; the first entry wins. An empty name
/// never matches.
pub fn resolve(engine_name: &str) -> Option<&'static str> {
    if engine_name.is_empty() {
        return None;
    }
    let driver = EMBEDDED_DRIVERS
        .iter()
        .find(|entry| entry.display_name == engine_name)
        .map(EmbeddedDriver::driver_class_name);
    if let Some(class) = driver {
        tracing::debug!(engine = engine_name, driver = class, "using db driver class");
    }
    driver
}
