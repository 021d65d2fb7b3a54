//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment. Env vars (`SRX_*`) are the base layer, an optional TOML
//! file goes on top. Nested keys use a double underscore in the environment:
//! `SRX_ELASTICSEARCH__URL`, `SRX_INDEXER__BULK_LIMIT_BYTES`.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::ElasticsearchConfig;
use crate::indexer::IndexerConfig;

/// 🔎 Knobs for the read side.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Page size when the caller doesn't ask for one.
    pub default_per_page: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { default_per_page: 20 }
    }
}

/// 🧵 How the indexing pipeline is wired.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many reference lines may wait between the reader and the indexer.
    #[serde(alias = "channel_size")]
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { queue_capacity: 1024 }
    }
}

/// 📦 Everything the app needs to know about itself. Every section is optional;
/// an empty file gives you a local, unsigned, development setup.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub elasticsearch: ElasticsearchConfig,
    pub indexer: IndexerConfig,
    pub search: SearchConfig,
    pub runtime: RuntimeConfig,
}

/// 🚀 Load the config from `SRX_*` env vars, plus a TOML file when one is given.
/// The file wins on conflicts.
///
/// 💀 Returns an error if the config is unparseable, with enough context to
/// tell a bad file from a bad environment.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!("🔧 Loading configuration: {:?}", config_file_name);

    let config = Figment::new().merge(Env::prefixed("SRX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (SRX_*).",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (SRX_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to create a temp config. The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        file
    }

    #[test]
    fn the_one_where_the_file_sets_every_section() {
        let file = write_test_config(
            r#"
            [elasticsearch]
            url = "https://search.example.com:9243"
            index_name = "gitlab-production"
            aws = true
            aws_region = "eu-west-1"
            aws_access_key = "AKIDEXAMPLE"
            aws_secret_access_key = "wJalrXUtnFEMI"
            timeout_secs = 5

            [indexer]
            bulk_limit_bytes = 2048
            limit_indexing = true

            [search]
            default_per_page = 50

            [runtime]
            channel_size = 64
            "#,
        );

        let config = load_config(Some(file.path())).expect("💀 A complete config should parse.");
        assert_eq!(config.elasticsearch.url, "https://search.example.com:9243");
        assert_eq!(config.elasticsearch.index_name, "gitlab-production");
        assert!(config.elasticsearch.aws);
        assert_eq!(config.elasticsearch.aws_region, "eu-west-1");
        assert_eq!(config.elasticsearch.aws_access_key.as_deref(), Some("AKIDEXAMPLE"));
        assert_eq!(config.elasticsearch.timeout_secs, 5);
        assert_eq!(config.elasticsearch.connect_timeout_secs, 10, "unset keys keep their defaults");
        assert_eq!(config.indexer.bulk_limit_bytes, 2048);
        assert!(config.indexer.limit_indexing);
        assert_eq!(config.search.default_per_page, 50);
        assert_eq!(config.runtime.queue_capacity, 64, "the old name still works");
    }

    #[test]
    fn the_one_where_an_empty_file_means_local_development() {
        let file = write_test_config("");
        let config: AppConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 An empty config should fall back to defaults.");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.elasticsearch.url, "http://localhost:9200");
        assert!(!config.elasticsearch.aws);
        assert_eq!(config.search.default_per_page, 20);
        assert_eq!(config.runtime.queue_capacity, 1024);
    }

    #[test]
    fn the_one_where_a_typo_in_a_number_is_loud() {
        let file = write_test_config(
            r#"
            [indexer]
            bulk_limit_bytes = "ten megs"
            "#,
        );
        let err = load_config(Some(file.path())).expect_err("💀 A string is not a byte count.");
        assert!(format!("{err:#}").contains("Failed to parse configuration"));
    }

    #[test]
    fn the_one_where_the_toml_crate_agrees_with_figment() {
        let parsed: AppConfig = toml::from_str("[search]\ndefault_per_page = 7\n")
            .expect("💀 toml should read the same shape.");
        assert_eq!(parsed.search.default_per_page, 7);
        assert_eq!(parsed.indexer, IndexerConfig::default());
    }
}
