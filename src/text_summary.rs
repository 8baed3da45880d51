//! Text summary builder for CLI output.
//!
//! Formats the resolved catalog as human-readable lines for `--list`.

use crate::orchestrator::Listing;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn admin_mark(level: crate::model::AuthLevel) -> &'static str {
    match level {
        crate::model::AuthLevel::RequiresAdmin => " [admin]",
        crate::model::AuthLevel::Unrestricted => "",
    }
}

/// Build a text summary of the resolved catalog.
pub(crate) fn build_text_summary(listing: &Listing) -> TextSummary {
    let mut lines = Vec::new();

    let computer = &listing.computer;
    lines.push(format!(
        "Computer: {} (CID-{}) project {}",
        computer.name, computer.id, listing.project
    ));
    if let Some(server) = computer.server.as_deref() {
        lines.push(format!("Server: {server}"));
    }
    if !computer.helpdesk.trim().is_empty() {
        lines.push(format!("Helpdesk: {}", computer.helpdesk.trim()));
    }

    lines.push(String::new());
    lines.push(format!("Applications ({})", listing.apps.len()));
    let width = listing
        .apps
        .iter()
        .map(|a| a.name.chars().count())
        .max()
        .unwrap_or(0);
    for app in &listing.apps {
        lines.push(format!(
            "  {:<width$}  {:<13} {}{}",
            app.name,
            app.state.label(),
            app.category,
            admin_mark(app.level),
        ));
    }

    lines.push(String::new());
    lines.push(format!("Devices ({})", listing.devices.len()));
    for dev in &listing.devices {
        let mut head = format!("  {} {} ({})", dev.name, dev.model, dev.connection);
        if let Some(location) = dev.location.as_deref() {
            head.push_str(&format!(" @ {location}"));
        }
        lines.push(head);
        for b in &dev.bindings {
            lines.push(format!("    {:<20} {}", b.name, b.state.label()));
        }
    }

    TextSummary { lines }
}
