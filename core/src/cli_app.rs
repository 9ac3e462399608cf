use crate::chat_types::{Message, SearchResult, UNKNOWN_PEER_NAME};
use crate::connection::ConnectionState;
use crate::sync::{EngineEvent, EngineSnapshot};
use chrono::{DateTime, Local};
use colored::*;

/// Line commands understood by the `chatsync` prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Open(String),
    Send { peer_id: String, content: String },
    New(String),
    Search(String),
    List,
    History,
    Refresh,
    Visible(bool),
    Status,
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> anyhow::Result<Option<CliCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    let parsed = match command {
        "open" => CliCommand::Open(required(rest, "open <peer_id>")?),
        "send" => {
            let (peer_id, content) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow::anyhow!("Usage: send <peer_id> <message>"))?;
            CliCommand::Send {
                peer_id: peer_id.to_string(),
                content: content.trim_start().to_string(),
            }
        }
        "new" => CliCommand::New(required(rest, "new <peer_id>")?),
        // An empty query is allowed: it clears the results
        "search" => CliCommand::Search(rest.to_string()),
        "list" => CliCommand::List,
        "history" => CliCommand::History,
        "refresh" => CliCommand::Refresh,
        "visible" => match rest {
            "on" => CliCommand::Visible(true),
            "off" => CliCommand::Visible(false),
            _ => anyhow::bail!("Usage: visible on|off"),
        },
        "status" => CliCommand::Status,
        "help" | "?" => CliCommand::Help,
        "quit" | "exit" => CliCommand::Quit,
        other => anyhow::bail!("Unknown command: {}", other),
    };
    Ok(Some(parsed))
}

fn required(rest: &str, usage: &str) -> anyhow::Result<String> {
    if rest.is_empty() {
        anyhow::bail!("Usage: {}", usage);
    }
    Ok(rest.to_string())
}

/// The search hit for `peer_id`, or a bare entry when it was typed by hand
pub fn resolve_new_peer(snapshot: &EngineSnapshot, peer_id: &str) -> SearchResult {
    snapshot
        .search_results
        .iter()
        .find(|hit| hit.id == peer_id)
        .cloned()
        .unwrap_or_else(|| SearchResult {
            id: peer_id.to_string(),
            email: String::new(),
            display_name: UNKNOWN_PEER_NAME.to_string(),
            avatar: String::new(),
        })
}

/// Server timestamps render as local `HH:MM`; labels pass through
pub fn format_time(label: &str) -> String {
    match DateTime::parse_from_rfc3339(label) {
        Ok(ts) => ts.with_timezone(&Local).format("%H:%M").to_string(),
        Err(_) => label.to_string(),
    }
}

pub fn print_usage() {
    println!("{}", "💬 chatsync".bright_cyan().bold());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {} <peer_id>            Open a conversation", "open".cyan());
    println!("  {} <peer_id> <message>  Send a message", "send".cyan());
    println!("  {} <peer_id>             Start a conversation with a search hit", "new".cyan());
    println!("  {} <query>            Search users by email", "search".cyan());
    println!("  {}                      List conversations", "list".cyan());
    println!("  {}                   Show the open conversation", "history".cyan());
    println!("  {}                   Fetch the conversation list again", "refresh".cyan());
    println!("  {} on|off             Simulate window focus", "visible".cyan());
    println!("  {}                    Show connection status", "status".cyan());
    println!("  {}                      Exit", "quit".cyan());
}

pub fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::ConnectionChanged { state } => {
            println!("{} {}", "●".bold(), colored_state(*state));
        }
        EngineEvent::ConversationsChanged { total_unread } => {
            println!(
                "{} Conversations updated ({} unread)",
                "↻".cyan(),
                total_unread.to_string().yellow()
            );
        }
        EngineEvent::HistoryChanged { peer_id, len } => {
            if let Some(peer) = peer_id {
                println!("{} {} messages with {}", "✉".cyan(), len, peer.cyan());
            }
        }
        EngineEvent::ScrollToLatest { .. } => {}
        EngineEvent::SendFailed { peer_id, reason, .. } => {
            eprintln!("{} Send to {} failed: {}", "✗".red().bold(), peer_id.cyan(), reason.red());
        }
        EngineEvent::SearchResults { query, count } => {
            println!("{} {} result(s) for {:?}", "🔍".cyan(), count, query);
        }
    }
}

pub fn print_conversations(snapshot: &EngineSnapshot) {
    if snapshot.conversations.is_empty() {
        println!("{}", "No conversations yet".yellow());
        return;
    }
    println!(
        "{}",
        format!(
            "Conversations ({}, {} unread)",
            snapshot.conversations.len(),
            snapshot.total_unread
        )
        .bright_cyan()
        .bold()
    );
    println!("{}", "─".repeat(60).dimmed());
    for summary in &snapshot.conversations {
        let unread = if summary.unread > 0 {
            format!("[{}]", summary.unread).yellow().bold().to_string()
        } else {
            String::new()
        };
        println!(
            "  {} {} {} {} {}",
            summary.display_name.bright_white(),
            format!("({})", summary.peer_id).dimmed(),
            unread,
            format_time(&summary.last_activity).dimmed(),
            summary.last_message
        );
    }
    if !snapshot.search_results.is_empty() {
        println!("{}", "Search results".bright_cyan().bold());
        for hit in &snapshot.search_results {
            println!("  {} {} {}", hit.display_name.bright_white(), hit.email.dimmed(), hit.id.cyan());
        }
    }
}

pub fn print_history(snapshot: &EngineSnapshot, self_id: &str) {
    let Some(peer) = &snapshot.active_peer else {
        println!("{}", "No conversation open".yellow());
        return;
    };
    println!(
        "{}",
        format!("{} ({})", peer.display_name, peer.peer_id).bright_cyan().bold()
    );
    println!("{}", "─".repeat(60).dimmed());
    for message in &snapshot.history {
        println!("{}", history_line(message, self_id));
    }
}

fn history_line(message: &Message, self_id: &str) -> String {
    let who = if message.sender_id == self_id {
        "me".green().to_string()
    } else {
        message.sender_id.cyan().to_string()
    };
    format!(
        "  {} {}: {} {}",
        format_time(&message.create_time).dimmed(),
        who,
        message.content,
        format!("({})", message.status).dimmed()
    )
}

pub fn print_status(snapshot: &EngineSnapshot) {
    println!(
        "{}",
        "╭─ chatsync status ─────────────────────────────────────────────╮".bright_cyan()
    );
    println!("{} Connection: {}", "│".bright_cyan(), colored_state(snapshot.connection));
    println!("{} Unread:     {}", "│".bright_cyan(), snapshot.total_unread.to_string().yellow());
    println!("{} Title:      {}", "│".bright_cyan(), snapshot.title);
    if let Some(peer) = &snapshot.active_peer {
        println!("{} Open:       {}", "│".bright_cyan(), peer.peer_id.cyan());
    }
    println!(
        "{}",
        "╰───────────────────────────────────────────────────────────────╯".bright_cyan()
    );
}

fn colored_state(state: ConnectionState) -> ColoredString {
    let text = state.to_string();
    match state {
        ConnectionState::Connected => text.green(),
        ConnectionState::Connecting => text.yellow(),
        ConnectionState::Disconnected => text.red(),
    }
}
