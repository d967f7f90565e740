use crate::config::Config;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use std::fs::File;
use std::path::Path;

/// Load and parse configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open configuration file {:?}", config_path))?;

    let config: Config = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse configuration file {:?}", config_path))?;

    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_full_config() {
        let yaml = r#"
general:
  log_level: debug
tunnel:
  relay_url: "wss://relay.example.com/v4/connect"
  destination: { host: "10.0.0.2", port: 22 }
  local_port: 2222
  max_message_size: 16384
  connect_timeout: "10s"
analysis:
  window_start: "2019-12-01T00:00:00Z"
  window_end: "2020-01-01T00:00:00Z"
  events: "events.json"
  inventory: "inventory.json"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.log_level(), "debug");

        let tunnel = config.tunnel.unwrap();
        assert_eq!(tunnel.local_port, Some(2222));
        assert_eq!(tunnel.endpoint().max_message_size, 16384);

        let analysis = config.analysis.unwrap();
        assert_eq!(analysis.events.to_str(), Some("events.json"));
        assert!(analysis.inventory.is_some());
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let yaml = r#"
analysis:
  window_start: "2020-01-01T00:00:00Z"
  window_end: "2019-12-01T00:00:00Z"
  events: "events.json"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        assert!(load_config(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_config(Path::new("/nonexistent/tunnelscope.yaml")).is_err());
    }
}
