//! `ucanscope show`: print the decoded message of one request or response

use super::{find_request, load_session};
use crate::capture::classify;
use anyhow::Result;
use console::style;
use std::path::PathBuf;
use ucanscope_common::{AgentMessage, Decoded, Delegation, Outcome, Proof, Ran};

pub struct ShowOptions {
    pub har: PathBuf,
    pub id: u64,
    pub response: bool,
    pub json: bool,
}

pub async fn run(opts: ShowOptions) -> Result<()> {
    let session = load_session(&opts.har)?;
    let request = find_request(&session, opts.id)?;

    let decoded = if opts.response {
        let bytes = request.response_body.as_ref().map(|body| body.bytes());
        Decoded::from_body(bytes.as_deref())
    } else {
        request.request_message().clone()
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&decoded)?);
        return Ok(());
    }

    println!(
        "{} {} {}",
        style(&request.method).bold(),
        request.url,
        classify::format_timing(classify::timing(&request))
    );
    println!();

    match &decoded {
        Decoded::NoBody => println!("(no body)"),
        Decoded::Failure(failure) => {
            println!("{}", style(failure.to_string()).red());
            tracing::debug!("Decode failure: {}", failure.reason());
        }
        Decoded::Message(message) => print_message(message),
    }
    Ok(())
}

fn print_message(message: &AgentMessage) {
    println!("{} {}", style("Message").bold(), message.root);

    for invocation in &message.invocations {
        println!();
        println!("{} {}", style("Invocation").cyan().bold(), invocation.cid);
        print_delegation(invocation, "  ");

        if let Some(receipt) = message.receipt_for(&invocation.cid) {
            print_outcome(&receipt.out, "  ");
        }
    }

    for (ran, receipt) in &message.receipts {
        let ran_inline = matches!(&receipt.ran, Ran::Invocation(_));
        println!();
        println!("{} {}", style("Receipt").magenta().bold(), receipt.link);
        println!("  ran: {}{}", ran, if ran_inline { "" } else { " (not included)" });
        print_outcome(&receipt.out, "  ");
        if !receipt.fork.is_empty() {
            let fork: Vec<String> = receipt.fork.iter().map(|link| link.to_string()).collect();
            println!("  fx.fork: {}", fork.join(", "));
        }
        if let Some(join) = &receipt.join {
            println!("  fx.join: {}", join);
        }
    }
}

fn print_delegation(delegation: &Delegation, indent: &str) {
    println!("{}iss: {}", indent, delegation.issuer);
    println!("{}aud: {}", indent, delegation.audience);
    for capability in &delegation.capabilities {
        println!(
            "{}can: {} with: {}",
            indent,
            style(&capability.can).green(),
            capability.with
        );
        if let Some(nb) = &capability.nb {
            println!("{}  nb: {}", indent, nb);
        }
    }
    match delegation.expiration {
        Some(exp) => println!("{}exp: {}", indent, exp),
        None => println!("{}exp: never", indent),
    }

    for node in delegation.proof_tree() {
        let pad = "  ".repeat(node.depth);
        match node.proof {
            Proof::Delegation(proof) => {
                let caps: Vec<&str> = proof.capabilities.iter().map(|c| c.can.as_str()).collect();
                println!(
                    "{}{}proof {} {} -> {} [{}]",
                    indent,
                    pad,
                    proof.cid,
                    proof.issuer,
                    proof.audience,
                    caps.join(", ")
                );
            }
            Proof::Link(link) => println!("{}{}proof {} (not included)", indent, pad, link),
        }
    }
}

fn print_outcome(out: &Outcome, indent: &str) {
    match out {
        Outcome::Ok(value) => println!("{}{} {}", indent, style("ok").green(), value),
        Outcome::Error(value) => println!("{}{} {}", indent, style("error").red(), value),
    }
}
