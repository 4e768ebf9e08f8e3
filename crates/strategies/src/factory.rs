use crate::ma_crossover::MACrossover;
use crate::types::MACrossoverSettings;
use crate::{Error, Result, Strategy, StrategyBlueprint};
use core_types::StrategyConfig;

/// Turns configured strategy entries into blueprints.
///
/// Parameters are parsed and a probe instance is built up front, so an
/// invalid entry is reported before any simulation starts.
pub fn create_blueprints(configs: &[StrategyConfig]) -> Result<Vec<StrategyBlueprint>> {
    let mut blueprints = Vec::with_capacity(configs.len());

    for strat_config in configs {
        let blueprint = match strat_config.name.as_str() {
            "ma_crossover" => {
                let settings: MACrossoverSettings = strat_config.params.clone().try_into()?;
                MACrossover::new(settings.clone())?;
                StrategyBlueprint::new(strat_config.result_key(), move || {
                    Ok(Box::new(MACrossover::new(settings.clone())?) as Box<dyn Strategy>)
                })
            }
            unknown => return Err(Error::UnknownStrategy(unknown.to_string())),
        };
        tracing::debug!(strategy = blueprint.name(), "Registered strategy blueprint.");
        blueprints.push(blueprint);
    }

    Ok(blueprints)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml_str: &str) -> StrategyConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn builds_blueprint_per_entry() {
        let configs = vec![
            config(
                r#"
                name = "ma_crossover"
                label = "ma_5_20"
                params = { fast_period = 5, slow_period = 20 }
                "#,
            ),
            config(
                r#"
                name = "ma_crossover"
                params = { fast_period = 10, slow_period = 50, confidence = 0.6 }
                "#,
            ),
        ];

        let blueprints = create_blueprints(&configs).unwrap();
        assert_eq!(blueprints.len(), 2);
        assert_eq!(blueprints[0].name(), "ma_5_20");
        assert_eq!(blueprints[1].name(), "ma_crossover");
        assert_eq!(blueprints[0].build().unwrap().name(), "ma_crossover");
    }

    #[test]
    fn unknown_and_invalid_entries_are_rejected() {
        let unknown = config(r#"name = "martingale""#);
        assert!(matches!(
            create_blueprints(&[unknown]),
            Err(Error::UnknownStrategy(name)) if name == "martingale"
        ));

        let inverted = config(
            r#"
            name = "ma_crossover"
            params = { fast_period = 30, slow_period = 10 }
            "#,
        );
        assert!(matches!(
            create_blueprints(&[inverted]),
            Err(Error::InvalidParameters(_))
        ));
    }
}
