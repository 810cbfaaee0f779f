use crate::cmd::open_service;
use crate::output::{print_json, print_table};
use clap::Subcommand;
use recipes_core::approval::ApprovalRequest;
use std::path::Path;

#[derive(Subcommand)]
pub enum ApprovalSubcommand {
    /// Open an approval request for a revision
    Request { revision_id: u64 },
    /// Approve a pending request and sign the revision if it is current
    Approve {
        id: u64,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Reject a pending request
    Reject {
        id: u64,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Withdraw a pending request
    Close { id: u64 },
    /// List approval requests
    List,
}

pub fn run(
    root: &Path,
    subcmd: ApprovalSubcommand,
    user: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let service = open_service(root)?;
    let user = user.map(str::to_string);

    let (request, verb) = match subcmd {
        ApprovalSubcommand::List => return print_list(&service.approval_requests()?, json),
        ApprovalSubcommand::Request { revision_id } => {
            (service.request_approval(revision_id, user)?, "Requested")
        }
        ApprovalSubcommand::Approve { id, comment } => {
            (service.approve(id, user, comment)?, "Approved")
        }
        ApprovalSubcommand::Reject { id, comment } => {
            (service.reject(id, user, comment)?, "Rejected")
        }
        ApprovalSubcommand::Close { id } => (service.close(id)?, "Closed"),
    };

    if json {
        return print_json(&request);
    }
    println!(
        "{verb} approval request {} for revision {}",
        request.id, request.revision_id
    );
    Ok(())
}

fn print_list(requests: &[ApprovalRequest], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&requests);
    }
    if requests.is_empty() {
        println!("No approval requests.");
        return Ok(());
    }
    let dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
    let rows = requests
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.revision_id.to_string(),
                r.status.to_string(),
                dash(&r.creator),
                dash(&r.approver),
            ]
        })
        .collect();
    print_table(&["ID", "REVISION", "STATUS", "CREATOR", "APPROVER"], rows);
    Ok(())
}
