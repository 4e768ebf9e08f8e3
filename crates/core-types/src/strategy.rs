use serde::Deserialize;
use toml::Value;

/// One strategy entry of a backtest job, as written in the config files.
#[derive(Deserialize, Debug, Clone)]
pub struct StrategyConfig {
    /// The registered strategy name (e.g. "ma_crossover").
    pub name: String,
    /// Optional key used in result maps. Lets one job run the same strategy
    /// with several parameter sets.
    #[serde(default)]
    pub label: Option<String>,
    // This will hold the `params = { ... }` table from the TOML
    #[serde(default = "default_params")]
    pub params: Value,
}

impl StrategyConfig {
    /// The name results for this entry are keyed by.
    pub fn result_key(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

fn default_params() -> Value {
    Value::Table(toml::map::Map::new())
}
