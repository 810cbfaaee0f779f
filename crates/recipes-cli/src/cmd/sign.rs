use crate::cmd::open_service;
use crate::output::{print_json, print_table};
use recipes_core::workflow::SignatureState;
use std::path::Path;

pub fn sign(root: &Path, json: bool) -> anyhow::Result<()> {
    let service = open_service(root)?;
    let report = service.resign_eligible()?;

    if json {
        return print_json(&serde_json::json!({
            "recipes": report.recipes,
            "actions": report.actions,
        }));
    }
    println!(
        "Signed {} recipe(s) and {} action(s)",
        report.recipes, report.actions
    );
    Ok(())
}

/// Exits non-zero if any checked signature is stale or invalid.
pub fn verify(root: &Path, recipe: Option<u64>, json: bool) -> anyhow::Result<()> {
    let service = open_service(root)?;

    let mut results: Vec<(String, String, SignatureState)> = Vec::new();
    match recipe {
        Some(id) => results.push(("recipe".into(), id.to_string(), service.verify(id)?)),
        None => {
            for snap in service.list_recipes(None, &Default::default())? {
                let id = snap.id();
                results.push(("recipe".into(), id.to_string(), service.verify(id)?));
            }
            for action in service.actions()? {
                let state = service.verify_action(&action.name)?;
                results.push(("action".into(), action.name, state));
            }
        }
    }

    if json {
        let list: Vec<serde_json::Value> = results
            .iter()
            .map(|(kind, id, state)| {
                serde_json::json!({ "kind": kind, "id": id, "signature": state.as_str() })
            })
            .collect();
        print_json(&list)?;
    } else {
        let rows = results
            .iter()
            .map(|(kind, id, state)| vec![kind.clone(), id.clone(), state.to_string()])
            .collect();
        print_table(&["KIND", "ID", "SIGNATURE"], rows);
    }

    let failed = results
        .iter()
        .filter(|(_, _, state)| matches!(state, SignatureState::Stale | SignatureState::Invalid))
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} stale or invalid signature(s)");
    }
    Ok(())
}
