use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_concurrent: usize,
    #[serde(with = "humantime_serde")]
    pub sync_call_timeout: Duration,
    pub runner_mailbox_capacity: usize,
    pub controller_mailbox_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            sync_call_timeout: Duration::from_secs(3),
            runner_mailbox_capacity: 16,
            controller_mailbox_capacity: 64,
        }
    }
}

const ENV_PREFIX: &str = "COMPACTION_CONTROLLER__";

impl Config {
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/compaction-controller.toml"))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }
}

pub trait HasConfigExamples<T> {
    fn examples() -> Vec<T>;
}

impl HasConfigExamples<Config> for Config {
    fn examples() -> Vec<Config> {
        vec![
            Config::default(),
            Config {
                max_concurrent: 1,
                ..Config::default()
            },
            Config {
                max_concurrent: 32,
                sync_call_timeout: Duration::from_secs(10),
                runner_mailbox_capacity: 64,
                controller_mailbox_capacity: 256,
            },
        ]
    }
}
