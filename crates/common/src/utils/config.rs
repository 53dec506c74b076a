use anyhow::{Context, Result};
use ::config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Loads configuration from a file into a struct.
/// Supports TOML, YAML, JSON, etc. based on file extension.
pub fn load_config<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path_str = path.as_ref().to_str().context("Invalid config path")?;

    let settings = Config::builder()
        .add_source(File::with_name(path_str))
        .build()
        .context("Failed to build configuration")?;

    settings.try_deserialize::<T>().context("Failed to deserialize configuration")
}

/// Same as [`load_config`], then overlays `{PREFIX}__{FIELD}` environment variables.
pub fn load_config_with_env<T: DeserializeOwned, P: AsRef<Path>>(path: P, prefix: &str) -> Result<T> {
    let path_str = path.as_ref().to_str().context("Invalid config path")?;

    let settings = Config::builder()
        .add_source(File::with_name(path_str))
        .add_source(Environment::with_prefix(prefix).separator("__"))
        .build()
        .context("Failed to build configuration")?;

    settings.try_deserialize::<T>().context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        #[serde(default)]
        limit: u32,
    }

    #[test]
    fn test_load_toml_config() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "name = \"faucet\"\nlimit = 3").unwrap();

        let sample: Sample = load_config(file.path()).unwrap();
        assert_eq!(sample.name, "faucet");
        assert_eq!(sample.limit, 3);
    }

    #[test]
    fn test_missing_file_is_error() {
        let result: Result<Sample> = load_config("/definitely/not/here.toml");
        assert!(result.is_err());
    }
}
