use crate::cmd::{open_service, parse_json_arg};
use crate::output::{list, print_json, print_table, yes_no};
use clap::{Args, Subcommand};
use recipes_core::filter::FilterSet;
use recipes_core::recipe::{RecipeFields, RecipeSnapshot};
use recipes_core::types::RecipeStatus;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Subcommand)]
pub enum RecipeSubcommand {
    /// List recipes, optionally filtered
    List(ListArgs),
    /// Show a recipe's current state
    Show { id: u64 },
    /// Show every revision of a recipe, newest first
    History { id: u64 },
    /// Create a recipe with its first revision
    Create(FieldArgs),
    /// Record a new revision; omitted fields keep their current value
    Update {
        id: u64,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Enable a recipe whose latest revision is approved
    Enable { id: u64 },
    /// Disable a recipe
    Disable { id: u64 },
}

#[derive(Args)]
pub struct ListArgs {
    /// enabled | disabled
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    action: Option<String>,
    /// true | false
    #[arg(long)]
    enabled: Option<String>,
    /// Comma-separated channel slugs
    #[arg(long)]
    channels: Option<String>,
    /// Comma-separated locale codes
    #[arg(long)]
    locales: Option<String>,
    /// Comma-separated country codes
    #[arg(long)]
    countries: Option<String>,
    /// Substring of the name or extra filter expression
    #[arg(long)]
    text: Option<String>,
}

impl ListArgs {
    fn into_query(self) -> BTreeMap<String, String> {
        [
            ("action", self.action),
            ("enabled", self.enabled),
            ("channels", self.channels),
            ("locales", self.locales),
            ("countries", self.countries),
            ("text", self.text),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
        .collect()
    }
}

#[derive(Args)]
pub struct FieldArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    action: Option<String>,
    /// Action arguments as a JSON object
    #[arg(long)]
    arguments: Option<String>,
    #[arg(long)]
    extra_filter: Option<String>,
    /// Channel slug (repeatable)
    #[arg(long = "channel")]
    channels: Vec<String>,
    /// Locale code (repeatable)
    #[arg(long = "locale")]
    locales: Vec<String>,
    /// Country code (repeatable)
    #[arg(long = "country")]
    countries: Vec<String>,
    /// Revision comment
    #[arg(long)]
    comment: Option<String>,
}

impl FieldArgs {
    fn into_fields(self) -> anyhow::Result<RecipeFields> {
        let arguments = match self.arguments {
            Some(raw) => Some(parse_json_arg("arguments", &raw)?),
            None => None,
        };
        let non_empty = |v: Vec<String>| if v.is_empty() { None } else { Some(v) };
        Ok(RecipeFields {
            name: self.name,
            action: self.action,
            arguments,
            extra_filter_expression: self.extra_filter,
            channels: non_empty(self.channels),
            locales: non_empty(self.locales),
            countries: non_empty(self.countries),
            comment: self.comment,
        })
    }
}

pub fn run(
    root: &Path,
    subcmd: RecipeSubcommand,
    user: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let service = open_service(root)?;
    let user = user.map(str::to_string);

    match subcmd {
        RecipeSubcommand::List(args) => {
            let status = args.status.as_deref().and_then(RecipeStatus::parse);
            let filters = FilterSet::from_query(&args.into_query())?;
            let recipes = service.list_recipes(status, &filters)?;
            print_list(&recipes, json)
        }
        RecipeSubcommand::Show { id } => {
            let snap = service.recipe(id)?;
            if json {
                return print_json(&snap.to_json());
            }
            print_detail(&snap, &service.verify(id)?.to_string());
            Ok(())
        }
        RecipeSubcommand::History { id } => {
            let history = service.history(id)?;
            if json {
                let list: Vec<serde_json::Value> = history.iter().map(|r| r.to_json()).collect();
                return print_json(&list);
            }
            let rows = history
                .iter()
                .map(|r| {
                    vec![
                        r.revision.id.to_string(),
                        r.revision.user.clone().unwrap_or_else(|| "-".into()),
                        r.revision.created_at.format("%Y-%m-%d %H:%M").to_string(),
                        r.approval
                            .as_ref()
                            .map(|a| a.status.to_string())
                            .unwrap_or_else(|| "-".into()),
                        r.revision.comment.clone(),
                    ]
                })
                .collect();
            print_table(&["REVISION", "USER", "CREATED", "APPROVAL", "COMMENT"], rows);
            Ok(())
        }
        RecipeSubcommand::Create(fields) => {
            let snap = service.create_recipe(fields.into_fields()?, user)?;
            report(&snap, "Created", json)
        }
        RecipeSubcommand::Update { id, fields } => {
            let snap = service.update_recipe(id, fields.into_fields()?, user)?;
            report(&snap, "Updated", json)
        }
        RecipeSubcommand::Enable { id } => report(&service.enable(id)?, "Enabled", json),
        RecipeSubcommand::Disable { id } => report(&service.disable(id)?, "Disabled", json),
    }
}

fn report(snap: &RecipeSnapshot, verb: &str, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&snap.to_json());
    }
    println!(
        "{verb} recipe {} '{}' (revision {})",
        snap.id(),
        snap.revision.name,
        snap.revision.id
    );
    Ok(())
}

fn print_list(recipes: &[RecipeSnapshot], json: bool) -> anyhow::Result<()> {
    if json {
        let list: Vec<serde_json::Value> = recipes.iter().map(|r| r.to_json()).collect();
        return print_json(&list);
    }
    if recipes.is_empty() {
        println!("No recipes.");
        return Ok(());
    }
    let rows = recipes
        .iter()
        .map(|s| {
            vec![
                s.id().to_string(),
                s.revision.name.clone(),
                s.revision.action_name.clone(),
                yes_no(s.is_enabled()),
                yes_no(s.is_approved()),
                list(&s.revision.channels),
            ]
        })
        .collect();
    print_table(
        &["ID", "NAME", "ACTION", "ENABLED", "APPROVED", "CHANNELS"],
        rows,
    );
    Ok(())
}

fn print_detail(snap: &RecipeSnapshot, signature: &str) {
    let rev = &snap.revision;
    println!("Recipe {}: {}", snap.id(), rev.name);
    println!("  action:     {}", rev.action_name);
    println!("  arguments:  {}", rev.arguments);
    println!("  channels:   {}", list(&rev.channels));
    println!("  locales:    {}", list(&rev.locales));
    println!("  countries:  {}", list(&rev.countries));
    println!("  filter:     {}", rev.filter_expression());
    println!("  revision:   {}", rev.id);
    println!("  enabled:    {}", yes_no(snap.is_enabled()));
    println!("  approved:   {}", yes_no(snap.is_approved()));
    if let Some(approval) = &snap.approval {
        println!("  approval:   #{} {}", approval.id, approval.status);
    }
    println!("  signature:  {signature}");
}
