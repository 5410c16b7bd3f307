#![allow(dead_code)]

use colored::Colorize;
use reconcile::{Headroom, Inventory, ValidationVerdict, VerdictStatus};
use std::collections::BTreeMap;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.len()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{}/{}]", num, total).blue().bold(), msg);
}

/// Print the headroom table
pub fn headroom_table(headroom: &BTreeMap<&'static str, Headroom>) {
    section("Free-tier headroom");
    for head in headroom.values() {
        let line = format!(
            "{:<20} {:>4} of {:>4} used, {:>4} remaining",
            head.category, head.used, head.limit, head.remaining
        );
        if head.exceeded {
            println!("  {} {}", line.yellow(), "(over the limit)".yellow().bold());
        } else {
            println!("  {line}");
        }
    }
}

/// Print the validation verdicts
pub fn verdict_table(verdicts: &[ValidationVerdict]) {
    section("Validation");
    for verdict in verdicts {
        let status = match verdict.status {
            VerdictStatus::Accepted => "accept".green(),
            VerdictStatus::Warned => "  warn".yellow().bold(),
            VerdictStatus::Rejected => "reject".red().bold(),
        };
        println!("  {status}  {:<20} {}", verdict.category, verdict.reason.dimmed());
    }
}

/// Print the inventory dashboard
pub fn inventory_dashboard(inventory: &Inventory) {
    section("Inventory");
    if inventory.is_empty() {
        dim("nothing discovered");
        return;
    }

    for kind in inventory.kinds() {
        println!("  {} ({})", kind.to_string().bold(), inventory.count(kind));
        for record in inventory.of(kind) {
            let mut detail = Vec::new();
            for key in ["class", "state", "ocpus", "memory_gb", "size_gb", "address"] {
                if let Some(value) = record.attr(key) {
                    detail.push(format!("{key}={value}"));
                }
            }
            println!(
                "    {} {}",
                record.display_name,
                detail.join(" ").dimmed()
            );
        }
    }

    // reserved-but-unattached addresses silently bill; call them out
    let stale: Vec<&str> = inventory
        .of(reconcile::ResourceKind::ReservedAddress)
        .iter()
        .filter(|r| r.attr("class") == Some("unattached"))
        .map(|r| r.display_name.as_str())
        .collect();
    if !stale.is_empty() {
        println!();
        warn(&format!(
            "{} reserved address(es) are not attached to anything and accrue charges: {}",
            stale.len(),
            stale.join(", ")
        ));
    }
}
