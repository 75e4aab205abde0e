use cs_domain::config::Config;

/// Validate the config, printing any problems.
///
/// Returns `true` when no problems were found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let problems = config.validate();

    if problems.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    for problem in &problems {
        println!("error: {problem}");
    }
    println!("\n{} problem(s) in {config_path}", problems.len());
    false
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("serializing config: {e}"))?;
    print!("{output}");
    Ok(())
}
