use serde::Serialize;

use super::load_config;

#[derive(Serialize)]
struct HostEntry {
    host: String,
    weight: u32,
}

pub fn hosts(config_path: &str, format: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let registry = config.build_registry()?;
    let entries: Vec<HostEntry> = registry
        .status()
        .into_iter()
        .map(|status| HostEntry {
            host: status.addr.to_string(),
            weight: status.weight,
        })
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            println!("{:<40} {:>6}", "HOST", "WEIGHT");
            for entry in &entries {
                println!("{:<40} {:>6}", entry.host, entry.weight);
            }
            println!();
            println!(
                "retry: {:?}  maxActive: {}  maxWait: {:?}",
                registry.policy(),
                config.pool.max_active,
                config.pool.max_wait
            );
        }
    }

    Ok(())
}
