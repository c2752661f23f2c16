use std::path::Path;

use kube_medic::config::Config;
use kube_medic::rules::{self, RuleEngine};

/// Compile every rule in the config file, reporting each outcome.
/// Unlike startup validation this does not stop at the first failure.
pub fn validate(config_path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(config_path)?;
    let config: Config = serde_yaml::from_str(&raw)?;

    if config.rules.is_empty() {
        println!("No rules configured.");
        return Ok(());
    }

    println!("Validating {} rule(s)...\n", config.rules.len());

    let mut failures = 0;
    for rule in &config.rules {
        match rules::validate_rule(rule) {
            Ok(()) => println!("  {:.<28} OK", format!("{} ", rule.name)),
            Err(e) => {
                failures += 1;
                println!("  {:.<28} FAIL", format!("{} ", rule.name));
                println!("    {e}");
            }
        }
    }

    println!();
    if failures > 0 {
        anyhow::bail!("{failures} rule(s) failed validation");
    }
    println!("All rules valid.");
    Ok(())
}

/// Local equivalent of the pattern-test API endpoint.
pub fn test(pattern: &str, sample: &str) -> anyhow::Result<()> {
    match RuleEngine::test_pattern(pattern, sample) {
        Ok(true) => println!("MATCH"),
        Ok(false) => println!("NO MATCH"),
        Err(e) => anyhow::bail!("pattern does not compile: {e}"),
    }
    Ok(())
}
