//! Game definitions and their schema.
//!
//! Game definitions arrive as loosely typed TOML tables, from the primary
//! config or from the games directory. [`GameDefinition::from_table`]
//! checks a table against the fixed [`FIELDS`] schema once, at load time,
//! and produces a strongly typed definition. A definition that fails is
//! skipped by the caller; it never aborts the whole load.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::ConfigError;

/// The primitive or container type a field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Bool,
    StringList,
    StringMap,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "a string"),
            Self::Bool => write!(f, "a boolean"),
            Self::StringList => write!(f, "a list of strings"),
            Self::StringMap => write!(f, "a map of string to string"),
        }
    }
}

/// One entry of the schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
}

const fn required(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        ty: FieldType::String,
        required: true,
    }
}

const fn optional(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        required: false,
    }
}

/// The game definition schema.
pub const FIELDS: &[FieldSpec] = &[
    required("id"),
    required("name"),
    required("crawl_binary"),
    required("rcfile_path"),
    required("macro_path"),
    required("morgue_path"),
    required("inprogress_path"),
    required("ttyrec_path"),
    required("socket_path"),
    required("client_path"),
    optional("dir_path", FieldType::String),
    optional("cwd", FieldType::String),
    optional("morgue_url", FieldType::String),
    optional("milestone_path", FieldType::String),
    optional("separator", FieldType::String),
    optional("send_json_options", FieldType::Bool),
    optional("options", FieldType::StringList),
    optional("env", FieldType::StringMap),
];

/// One playable game variant.
///
/// Path fields are templates: `%n` stands for the player's username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameDefinition {
    pub id: String,
    pub name: String,
    pub crawl_binary: String,
    pub rcfile_path: String,
    pub macro_path: String,
    pub morgue_path: String,
    pub inprogress_path: String,
    pub ttyrec_path: String,
    pub socket_path: String,
    pub client_path: String,
    pub dir_path: Option<String>,
    pub cwd: Option<String>,
    pub morgue_url: Option<String>,
    pub milestone_path: Option<String>,
    pub separator: Option<String>,
    pub send_json_options: bool,
    pub options: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Everything needed to start one game process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLaunch {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl GameDefinition {
    /// Validates a TOML table against [`FIELDS`].
    ///
    /// Unknown fields are logged and ignored.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidGame`] listing every missing required field
    /// and every type mismatch.
    pub fn from_table(table: &toml::Table) -> Result<Self, ConfigError> {
        let id = table
            .get("id")
            .and_then(toml::Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();

        for key in table.keys() {
            if !FIELDS.iter().any(|f| f.name == key.as_str()) {
                tracing::warn!(game = %id, property = %key, "unknown property in game definition");
            }
        }

        let problems: Vec<String> = FIELDS
            .iter()
            .filter_map(|field| match table.get(field.name) {
                None if field.required => Some(format!("missing required property '{}'", field.name)),
                None => None,
                Some(value) if !matches_type(value, field.ty) => {
                    Some(format!("property '{}' should be {}", field.name, field.ty))
                }
                Some(_) => None,
            })
            .collect();
        if !problems.is_empty() {
            return Err(ConfigError::InvalidGame {
                id,
                reason: problems.join("; "),
            });
        }

        let string = |name: &str| {
            table
                .get(name)
                .and_then(toml::Value::as_str)
                .map(str::to_owned)
        };
        let req = |name: &str| string(name).unwrap_or_default();

        Ok(Self {
            id,
            name: req("name"),
            crawl_binary: req("crawl_binary"),
            rcfile_path: req("rcfile_path"),
            macro_path: req("macro_path"),
            morgue_path: req("morgue_path"),
            inprogress_path: req("inprogress_path"),
            ttyrec_path: req("ttyrec_path"),
            socket_path: req("socket_path"),
            client_path: req("client_path"),
            dir_path: string("dir_path"),
            cwd: string("cwd"),
            morgue_url: string("morgue_url"),
            milestone_path: string("milestone_path"),
            separator: string("separator"),
            send_json_options: table
                .get("send_json_options")
                .and_then(toml::Value::as_bool)
                .unwrap_or(false),
            options: table
                .get("options")
                .and_then(toml::Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(toml::Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            env: table
                .get("env")
                .and_then(toml::Value::as_table)
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_owned())))
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Substitutes `%n` in a path template.
    pub fn expand(template: &str, username: &str) -> String {
        template.replace("%n", username)
    }

    /// Builds the command line for `username`:
    ///
    /// ```text
    /// crawl_binary -name <user> -rc <rcdir>/<user>.rc
    ///     -macro <macrodir>/<user>.macro -morgue <morgue> [options…]
    /// ```
    pub fn launch(&self, username: &str) -> GameLaunch {
        let path = |template: &str| PathBuf::from(Self::expand(template, username));

        let mut args: Vec<OsString> = vec![
            "-name".into(),
            username.into(),
            "-rc".into(),
            path(&self.rcfile_path)
                .join(format!("{username}.rc"))
                .into_os_string(),
            "-macro".into(),
            path(&self.macro_path)
                .join(format!("{username}.macro"))
                .into_os_string(),
            "-morgue".into(),
            path(&self.morgue_path).into_os_string(),
        ];
        args.extend(self.options.iter().map(OsString::from));

        GameLaunch {
            program: PathBuf::from(&self.crawl_binary),
            args,
            cwd: self.cwd.as_deref().map(path),
            env: self.env.clone(),
        }
    }
}

fn matches_type(value: &toml::Value, ty: FieldType) -> bool {
    match ty {
        FieldType::String => value.is_str(),
        FieldType::Bool => value.is_bool(),
        FieldType::StringList => value
            .as_array()
            .is_some_and(|items| items.iter().all(toml::Value::is_str)),
        FieldType::StringMap => value
            .as_table()
            .is_some_and(|map| map.values().all(toml::Value::is_str)),
    }
}
