use crate::cmd::{open_service, parse_json_arg};
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use recipes_core::paths::PUBLIC_API_ROOT;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum ActionSubcommand {
    /// Register an action, or replace it if the code or schema changed
    Add {
        name: String,
        /// File containing the action implementation
        #[arg(long)]
        implementation: PathBuf,
        /// Arguments schema as inline JSON
        #[arg(long, conflicts_with = "schema_file")]
        schema: Option<String>,
        /// File containing the arguments schema
        #[arg(long)]
        schema_file: Option<PathBuf>,
    },
    /// List all actions
    List,
    /// Show one action
    Show {
        name: String,
        /// Print the implementation instead of the metadata
        #[arg(long)]
        implementation: bool,
    },
}

pub fn run(root: &Path, subcmd: ActionSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ActionSubcommand::Add {
            name,
            implementation,
            schema,
            schema_file,
        } => add(root, &name, &implementation, schema, schema_file, json),
        ActionSubcommand::List => list(root, json),
        ActionSubcommand::Show {
            name,
            implementation,
        } => show(root, &name, implementation, json),
    }
}

fn add(
    root: &Path,
    name: &str,
    implementation: &Path,
    schema: Option<String>,
    schema_file: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let code = std::fs::read_to_string(implementation)
        .with_context(|| format!("failed to read {}", implementation.display()))?;
    let schema = match (schema, schema_file) {
        (Some(inline), _) => parse_json_arg("schema", &inline)?,
        (None, Some(path)) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            parse_json_arg("schema-file", &text)?
        }
        (None, None) => serde_json::json!({}),
    };

    let service = open_service(root)?;
    let action = service.register_action(name, &code, schema)?;

    if json {
        return print_json(&action.to_json(PUBLIC_API_ROOT));
    }
    println!(
        "Registered action '{}' ({})",
        action.name, action.implementation_hash
    );
    Ok(())
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let service = open_service(root)?;
    let actions = service.actions()?;

    if json {
        let list: Vec<serde_json::Value> =
            actions.iter().map(|a| a.to_json(PUBLIC_API_ROOT)).collect();
        return print_json(&list);
    }
    if actions.is_empty() {
        println!("No actions.");
        return Ok(());
    }
    let rows = actions
        .iter()
        .map(|a| {
            vec![
                a.name.clone(),
                a.implementation_hash[..12].to_string(),
                crate::output::yes_no(a.current_signature().is_some()),
            ]
        })
        .collect();
    print_table(&["NAME", "HASH", "SIGNED"], rows);
    Ok(())
}

fn show(root: &Path, name: &str, implementation: bool, json: bool) -> anyhow::Result<()> {
    let service = open_service(root)?;
    let action = service.action(name)?;

    if implementation {
        print!("{}", action.implementation);
        return Ok(());
    }
    if json {
        return print_json(&action.to_json(PUBLIC_API_ROOT));
    }
    println!("Action: {}", action.name);
    println!("Hash:   {}", action.implementation_hash);
    println!("URL:    {}", action.implementation_url(PUBLIC_API_ROOT));
    println!("Signed: {}", service.verify_action(name)?);
    println!(
        "Schema: {}",
        serde_json::to_string_pretty(&action.arguments_schema)?
    );
    Ok(())
}
