use agora_core::config::RunConfig;
use agora_core::decision::ProviderObjective;

/// Candidate provider names: the registry if populated, else the rate table.
fn candidates(config: &RunConfig) -> Vec<String> {
    let mut names: Vec<String> = if config.providers.is_empty() {
        config.provider_rates.keys().cloned().collect()
    } else {
        config.providers.keys().cloned().collect()
    };
    // Deterministic scan order regardless of map iteration.
    names.sort();
    names
}

/// Cheapest provider by estimated rate, `"default"` when none is configured.
pub fn select_provider(config: &RunConfig) -> String {
    let names = candidates(config);
    names
        .into_iter()
        .min_by(|a, b| {
            config
                .rate_for(a)
                .estimate()
                .total_cmp(&config.rate_for(b).estimate())
        })
        .unwrap_or_else(|| "default".to_string())
}

/// Provider choice for a decision objective: cheapest for `min_cost`,
/// priciest for `max_accuracy`, the configured default (or cheapest) when
/// `balanced`.
pub fn select_provider_for(objective: ProviderObjective, config: &RunConfig) -> String {
    match objective {
        ProviderObjective::MinCost => select_provider(config),
        ProviderObjective::MaxAccuracy => {
            let names = candidates(config);
            names
                .into_iter()
                .max_by(|a, b| {
                    config
                        .rate_for(a)
                        .estimate()
                        .total_cmp(&config.rate_for(b).estimate())
                })
                .unwrap_or_else(|| "default".to_string())
        }
        ProviderObjective::Balanced => config
            .default_provider
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| select_provider(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunConfig {
        toml::from_str(
            r#"
[providers.cheap]
[providers.pricey]

[provider_rates.cheap]
input = 0.001
output = 0.001

[provider_rates.pricey]
input = 0.1
output = 0.2
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_select_provider_picks_cheapest() {
        assert_eq!(select_provider(&config()), "cheap");
    }

    #[test]
    fn test_select_provider_empty_config() {
        assert_eq!(select_provider(&RunConfig::default()), "default");
    }

    #[test]
    fn test_objective_mapping() {
        let config = config();
        assert_eq!(select_provider_for(ProviderObjective::MinCost, &config), "cheap");
        assert_eq!(select_provider_for(ProviderObjective::MaxAccuracy, &config), "pricey");
        assert_eq!(select_provider_for(ProviderObjective::Balanced, &config), "cheap");

        let mut with_default = config;
        with_default.default_provider = Some("pricey".to_string());
        assert_eq!(
            select_provider_for(ProviderObjective::Balanced, &with_default),
            "pricey"
        );
    }

    #[test]
    fn test_rate_table_used_when_registry_empty() {
        let config: RunConfig = toml::from_str(
            r#"
[provider_rates.alpha]
input = 0.5

[provider_rates.beta]
input = 0.1
"#,
        )
        .unwrap();
        assert_eq!(select_provider(&config), "beta");
    }
}
