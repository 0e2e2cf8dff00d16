use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory, relative to the working directory, searched by [`load_config`].
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried, in order, for every configuration layer.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Environment variables starting with `APP_` override file values.
const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";

/// `APP_LOAD__MAX_BAD_RECORDS` addresses `load.max_bad_records`.
const ENV_SEPARATOR: &str = "__";

const LIST_SEPARATOR: &str = ",";

/// Implemented by every top level configuration structure.
pub trait Config {
    /// Keys whose environment variable overrides hold comma separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// One file layer of the configuration.
#[derive(Debug, Clone, Copy)]
enum Layer {
    Base,
    Environment(Environment),
}

impl Layer {
    fn file_stem(self) -> &'static str {
        match self {
            Layer::Base => "base",
            Layer::Environment(environment) => environment.as_str(),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Base => f.write_str("base configuration"),
            Layer::Environment(environment) => {
                write!(f, "{environment} environment configuration")
            }
        }
    }
}

/// Failure to assemble a configuration from files and environment variables.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingDirectory(PathBuf),

    /// No file with a supported extension exists for a layer.
    #[error("could not locate {layer} in `{directory}`; attempted: {attempted}")]
    MissingFile {
        layer: String,
        directory: PathBuf,
        attempted: String,
    },

    /// A layer file exists but is not valid for its format.
    #[error("failed to load {layer} from `{path}`: {source}")]
    InvalidFile {
        layer: String,
        path: PathBuf,
        source: config::ConfigError,
    },

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] config::ConfigError),

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),

    #[error("failed to merge configuration sources: {0}")]
    Merge(#[source] config::ConfigError),
}

/// Loads `T` from `./configuration` for the environment named by `APP_ENVIRONMENT`.
///
/// See [`load_config_from_dir`] for the layering rules.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let working_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load()?;

    load_config_from_dir(&working_dir.join(CONFIGURATION_DIR), environment)
}

/// Loads `T` from `directory` for `environment`.
///
/// `base.(yaml|yml|json)` is read first, then `{environment}.(yaml|yml|json)`, then `APP_`
/// prefixed environment variables. Later layers win. Both files are required.
pub fn load_config_from_dir<T>(
    directory: &Path,
    environment: Environment,
) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingDirectory(directory.to_path_buf()));
    }

    let mut builder = config::Config::builder();
    for layer in [Layer::Base, Layer::Environment(environment)] {
        let path = find_layer_file(directory, layer)?;
        builder = builder.add_source(config::File::from(path.as_path()));
        check_layer(&builder, layer, &path)?;
    }

    builder
        .add_source(environment_overrides::<T>())
        .build()
        .map_err(LoadConfigError::Merge)?
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

fn environment_overrides<T: Config>() -> config::Environment {
    let source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if T::LIST_PARSE_KEYS.is_empty() {
        return source;
    }

    T::LIST_PARSE_KEYS.iter().fold(
        source.try_parsing(true).list_separator(LIST_SEPARATOR),
        |source, key| source.with_list_parse_key(key),
    )
}

fn find_layer_file(directory: &Path, layer: Layer) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{}.{extension}", layer.file_stem())))
        .collect();

    if let Some(path) = candidates.iter().find(|path| path.is_file()) {
        return Ok(path.clone());
    }

    Err(LoadConfigError::MissingFile {
        layer: layer.to_string(),
        directory: directory.to_path_buf(),
        attempted: candidates
            .iter()
            .map(|path| format!("`{}`", path.display()))
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Builds the layers added so far to attribute parse errors to the file that caused them.
fn check_layer(
    builder: &ConfigBuilder<DefaultState>,
    layer: Layer,
    path: &Path,
) -> Result<(), LoadConfigError> {
    match builder.clone().build() {
        Ok(_) => Ok(()),
        Err(source) => Err(LoadConfigError::InvalidFile {
            layer: layer.to_string(),
            path: path.to_path_buf(),
            source,
        }),
    }
}
