use crate::cmd::load_config;
use crate::output::{print_json, print_table};
use anyhow::Context;
use e2e_deploy_core::infra::InfraClient;
use std::path::Path;

pub fn run(config_path: &Path, key: Option<&str>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let client = config.terraform_client();
    let ws = config.workspace();
    client.init(&ws).context("terraform init failed")?;

    if let Some(key) = key {
        let value = client.output(&ws, key)?;
        if json {
            let mut map = serde_json::Map::new();
            map.insert(key.to_string(), serde_json::Value::String(value));
            print_json(&map)?;
        } else {
            println!("{value}");
        }
        return Ok(());
    }

    let outputs = client.outputs(&ws).context("failed to read outputs")?;
    if json {
        let map: serde_json::Map<String, serde_json::Value> = outputs
            .keys()
            .filter_map(|k| outputs.get(k).map(|v| (k.to_string(), v.clone())))
            .collect();
        print_json(&map)?;
    } else if outputs.is_empty() {
        println!("No outputs in state.");
    } else {
        let rows = outputs
            .keys()
            .map(|k| {
                let value = match outputs.get(k) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                vec![k.to_string(), value]
            })
            .collect();
        print_table(&["OUTPUT", "VALUE"], rows);
    }
    Ok(())
}
