//! `vcsmirror config`.

use crate::context::Context;
use anyhow::Result;
use clap::Subcommand;
use sonic_rs::{JsonContainerTrait, JsonValueTrait};
use std::collections::BTreeMap;

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Print every effective setting and where it came from
    Show {
        /// Print the settings as JSON instead
        #[arg(long)]
        json: bool,
    },

    /// Print one effective setting, e.g. `worker.concurrency`
    Get {
        /// Setting name in dot notation
        key: String,
    },

    /// Print the path of the global configuration file
    Path,
}

pub fn run(ctx: &Context, command: &ConfigCommand) -> Result<()> {
    let value = sonic_rs::to_value(ctx.settings())?;
    let mut flat = BTreeMap::new();
    flatten("", &value, &mut flat);

    match command {
        ConfigCommand::Show { json: true } => {
            println!("{}", sonic_rs::to_string_pretty(ctx.settings())?);
        }
        ConfigCommand::Show { json: false } => {
            for (key, value) in &flat {
                let origin = ctx.resolved().origin(key);
                println!("{key} = {value} ({})", origin.description());
            }
        }
        ConfigCommand::Get { key } => {
            let value = flat
                .get(key.as_str())
                .ok_or_else(|| anyhow::anyhow!("Key not found: {key}"))?;
            println!("{value}");
        }
        ConfigCommand::Path => match vcsmirror_config::project_dirs() {
            Some(dirs) => println!("{}", dirs.config_dir().join("config.json").display()),
            None => anyhow::bail!("no home directory to place the global configuration in"),
        },
    }
    Ok(())
}

fn flatten(prefix: &str, value: &sonic_rs::Value, out: &mut BTreeMap<String, String>) {
    if let Some(object) = value.as_object() {
        for (key, child) in object.iter() {
            let key = if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix}.{key}")
            };
            flatten(&key, child, out);
        }
        return;
    }
    out.insert(prefix.to_string(), format_value(value));
}

fn format_value(value: &sonic_rs::Value) -> String {
    if let Some(s) = value.as_str() {
        return s.to_string();
    }
    if let Some(b) = value.as_bool() {
        return b.to_string();
    }
    if let Some(n) = value.as_u64() {
        return n.to_string();
    }
    if let Some(n) = value.as_i64() {
        return n.to_string();
    }
    if value.is_null() {
        return "(unset)".to_string();
    }
    value.to_string()
}
