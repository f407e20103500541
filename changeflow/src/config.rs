//! Configuration resolution.
//!
//! A run's configuration comes from two places: an optional properties file
//! and fields set explicitly by the caller. Explicit, non-empty fields always
//! win over the file. The `driver` entry is derived separately, see
//! [`resolve`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::driver;
use crate::engine::Contexts;
use crate::error::Error;

/// The closed set of configuration options the core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigurationKey {
    Driver,
    Username,
    Password,
    Url,
    DefaultSchemaName,
    DefaultCatalogName,
    ChangelogFile,
    Contexts,
}

impl ConfigurationKey {
    pub const ALL: [ConfigurationKey; 8] = [
        Self::Driver,
        Self::Username,
        Self::Password,
        Self::Url,
        Self::DefaultSchemaName,
        Self::DefaultCatalogName,
        Self::ChangelogFile,
        Self::Contexts,
    ];

    /// Name used for this key in properties files and in the resolved configuration.
    pub fn property_name(self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Username => "username",
            Self::Password => "password",
            Self::Url => "url",
            Self::DefaultSchemaName => "default-schema-name",
            Self::DefaultCatalogName => "default-catalog-name",
            Self::ChangelogFile => "changelog-file",
            Self::Contexts => "contexts",
        }
    }

    /// Command-line flag token for this key.
    pub fn flag(self) -> &'static str {
        match self {
            Self::Driver => "--driver",
            Self::Username => "--username",
            Self::Password => "--password",
            Self::Url => "--url",
            Self::DefaultSchemaName => "--default-schema-name",
            Self::DefaultCatalogName => "--default-catalog-name",
            Self::ChangelogFile => "--changelog-file",
            Self::Contexts => "--contexts",
        }
    }

    /// Liquibase-style spelling accepted in properties files.
    fn alias(self) -> Option<&'static str> {
        match self {
            Self::DefaultSchemaName => Some("defaultSchemaName"),
            Self::DefaultCatalogName => Some("defaultCatalogName"),
            Self::ChangelogFile => Some("changeLogFile"),
            _ => None,
        }
    }

    /// Find the key for a property name or its alias.
    pub fn from_property_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.property_name() == name || key.alias() == Some(name))
    }
}

impl fmt::Display for ConfigurationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.property_name())
    }
}

/// Fields set directly by the caller. Unset and empty values are both treated
/// as "not provided".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplicitFields {
    pub username: Option<String>,
    pub password: Option<String>,
    pub url: Option<String>,
    pub default_schema_name: Option<String>,
    pub changelog_file: Option<String>,
    pub contexts: Option<String>,
    /// Display name of a [`driver`] catalog entry.
    pub database_engine: Option<String>,
}

impl ExplicitFields {
    fn value_for(&self, key: ConfigurationKey) -> Option<&str> {
        let value = match key {
            ConfigurationKey::Username => &self.username,
            ConfigurationKey::Password => &self.password,
            ConfigurationKey::Url => &self.url,
            ConfigurationKey::DefaultSchemaName => &self.default_schema_name,
            ConfigurationKey::ChangelogFile => &self.changelog_file,
            ConfigurationKey::Contexts => &self.contexts,
            ConfigurationKey::Driver | ConfigurationKey::DefaultCatalogName => &None,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }
}

/// The finalized configuration for one run.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MigrationConfiguration {
    properties: BTreeMap<String, String>,
}

impl MigrationConfiguration {
    pub fn get(&self, key: ConfigurationKey) -> Option<&str> {
        self.get_raw(key.property_name())
    }

    /// Look up any entry by name, including unrecognized passthrough keys.
    pub fn get_raw(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// The contexts filter for this run.
    pub fn contexts(&self) -> Contexts {
        Contexts::parse(self.get(ConfigurationKey::Contexts).unwrap_or_default())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Render the recognized entries as `flag value` argument pairs, in
    /// [`ConfigurationKey::ALL`] order. Empty values are left out.
    pub fn to_command_line_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for key in ConfigurationKey::ALL {
            if let Some(value) = self.get(key).filter(|v| !v.is_empty()) {
                args.push(key.flag().to_string());
                args.push(value.to_string());
            }
        }
        args
    }

    fn set(&mut self, key: ConfigurationKey, value: impl Into<String>) {
        self.properties
            .insert(key.property_name().to_string(), value.into());
    }
}

// Password values never reach logs.
impl fmt::Debug for MigrationConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in &self.properties {
            if name == ConfigurationKey::Password.property_name() {
                map.entry(name, &"********");
            } else {
                map.entry(name, value);
            }
        }
        map.finish()
    }
}

type DriverSource = fn(&ExplicitFields, Option<&str>) -> Option<String>;

/// Tried in order; the first hit sets `driver`. With no hit a file-sourced
/// value stays as it is.
const DRIVER_SOURCES: [DriverSource; 2] = [explicit_driver, catalog_driver];

fn explicit_driver(_: &ExplicitFields, driver_override: Option<&str>) -> Option<String> {
    driver_override
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

fn catalog_driver(fields: &ExplicitFields, _: Option<&str>) -> Option<String> {
    fields
        .database_engine
        .as_deref()
        .and_then(driver::resolve)
        .map(str::to_string)
}

const EXPLICIT_KEYS: [ConfigurationKey; 6] = [
    ConfigurationKey::Username,
    ConfigurationKey::Password,
    ConfigurationKey::Url,
    ConfigurationKey::DefaultSchemaName,
    ConfigurationKey::ChangelogFile,
    ConfigurationKey::Contexts,
];

/// Build the configuration for a run.
///
/// The properties file, when given, forms the base. `driver` is then taken
/// from `driver_override`, or from the catalog entry named by
/// `fields.database_engine`, or left as the file had it. Finally every
/// non-empty explicit field overwrites its key.
pub fn resolve(
    properties_path: Option<&Path>,
    fields: &ExplicitFields,
    driver_override: Option<&str>,
) -> Result<MigrationConfiguration, Error> {
    let mut config = MigrationConfiguration::default();

    if let Some(path) = properties_path.filter(|p| !p.as_os_str().is_empty()) {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;
        for (name, value) in parse_properties(&content) {
            let name = match ConfigurationKey::from_property_name(&name) {
                Some(key) => key.property_name().to_string(),
                None => name,
            };
            config.properties.insert(name, value);
        }
        tracing::debug!(
            path = %path.display(),
            entries = config.len(),
            "loaded properties file"
        );
    }

    if let Some(driver) = DRIVER_SOURCES
        .iter()
        .find_map(|source| source(fields, driver_override))
    {
        config.set(ConfigurationKey::Driver, driver);
    }

    for key in EXPLICIT_KEYS {
        if let Some(value) = fields.value_for(key) {
            config.set(key, value);
        }
    }

    Ok(config)
}

/// Parse properties text the way `java.util.Properties` reads it.
///
/// `#` and `!` start comments and an odd number of trailing backslashes joins
/// the next line. The key ends at the first unescaped `=`, `:` or blank; one
/// `=` or `:` may follow blanks after the key. Backslash escapes (`\t`, `\n`,
/// `\r`, `\f`, `\uXXXX`, and `\` before any other character) are decoded in
/// keys and values. Later entries replace earlier ones with the same key.
fn parse_properties(content: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let mut lines = content.lines();
    while let Some(line) = lines.next() {
        let mut logical = line.trim_start_matches(is_blank).to_string();
        if logical.is_empty() || logical.starts_with(['#', '!']) {
            continue;
        }
        while continues(&logical) {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start_matches(is_blank)),
                None => break,
            }
        }
        let (key, value) = split_entry(&logical);
        entries.push((unescape(key), unescape(value)));
    }
    entries
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0c')
}

fn continues(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// Split a logical line into its raw key and raw value.
fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    for (idx, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                return (&line[..idx], line[idx + 1..].trim_start_matches(is_blank));
            }
            c if is_blank(c) => {
                key_end = idx;
                break;
            }
            _ => {}
        }
    }
    let rest = line[key_end..].trim_start_matches(is_blank);
    let rest = rest.strip_prefix(['=', ':']).unwrap_or(rest);
    (&line[..key_end], rest.trim_start_matches(is_blank))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.clone().take(4).collect();
                let decoded = Some(hex.as_str())
                    .filter(|h| h.len() == 4 && h.chars().all(|d| d.is_ascii_hexdigit()))
                    .and_then(|h| u32::from_str_radix(h, 16).ok())
                    .and_then(char::from_u32);
                match decoded {
                    Some(decoded) => {
                        out.push(decoded);
                        chars.nth(3);
                    }
                    // malformed escapes keep the letter, like other unknown escapes
                    None => out.push('u'),
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
