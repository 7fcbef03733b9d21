use chrono::{Local, NaiveDate};
use colored::*;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{Env, EventSourceKind, StoreBackend};
use crate::interfaces::{ActivityRecord, OrderRequest, PositionRecord, Side};

/// Human-facing console output, mirrored to `logs/relay-YYYY-MM-DD.log`.
/// Structured diagnostics go through `tracing` instead.
pub struct Logger;

pub fn log_file_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("relay-{}.log", date.format("%Y-%m-%d")))
}

pub fn append_log_line(dir: &Path, message: &str) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let now = Local::now();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path(dir, now.date_naive()))?;
    writeln!(file, "[{}] {}", now.to_rfc3339(), message)
}

impl Logger {
    fn logs_dir() -> PathBuf {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("logs")
    }

    fn write_to_file(message: &str) {
        // Write failures are ignored.
        let _ = append_log_line(&Self::logs_dir(), message);
    }

    /// `head` and `tail` of an address joined by `joiner`; anything too short,
    /// or not cut on char boundaries, is returned as is.
    fn shorten(address: &str, joiner: &str) -> String {
        let tail_start = address.len().saturating_sub(4);
        match (address.get(..6), address.get(tail_start..)) {
            (Some(head), Some(tail)) if address.len() >= 10 => format!("{}{}{}", head, joiner, tail),
            _ => address.to_string(),
        }
    }

    pub fn format_address(address: &str) -> String {
        Self::shorten(address, "...")
    }

    fn mask_address(address: &str) -> String {
        Self::shorten(address, "****")
    }

    fn line(icon: ColoredString, tag: &str, message: &str) {
        println!("{} {}", icon, message);
        Self::write_to_file(&format!("{}: {}", tag, message));
    }

    pub fn header(title: &str) {
        let rule = "━".repeat(70);
        println!("\n{}", rule.cyan());
        println!("{}", format!("  {}", title).cyan().bold());
        println!("{}\n", rule.cyan());
        Self::write_to_file(&format!("HEADER: {}", title));
    }

    pub fn info(message: &str) {
        Self::line("ℹ".blue(), "INFO", message);
    }

    pub fn success(message: &str) {
        Self::line("✓".green(), "SUCCESS", message);
    }

    pub fn warning(message: &str) {
        Self::line("⚠".yellow(), "WARNING", message);
    }

    pub fn error(message: &str) {
        Self::line("✗".red(), "ERROR", message);
    }

    pub fn separator() {
        println!("{}", "─".repeat(70).bright_black());
    }

    fn side_label(side: Side) -> ColoredString {
        match side {
            Side::Buy => side.as_str().green().bold(),
            Side::Sell => side.as_str().red().bold(),
        }
    }

    pub fn trade(trade: &ActivityRecord) {
        println!("\n{}", "─".repeat(70).magenta());
        println!("{}", "📊 NEW TRADE DETECTED".magenta().bold());
        println!("{}", format!("Trader: {}", Self::format_address(&trade.proxy_wallet)).bright_black());
        if let Some(side) = trade.side {
            println!("{}", format!("Side:   {}", Self::side_label(side)).bright_black());
        }
        if let Some(asset) = &trade.asset {
            println!("{}", format!("Asset:  {}", Self::format_address(asset)).bright_black());
        }
        println!("{}", format!("Amount: ${:.2} ({:.2} tokens)", trade.usdc_size, trade.size).bright_black());
        if let Some(price) = trade.price {
            println!("{}", format!("Price:  {}", price).bright_black());
        }
        if let Some(slug) = trade.event_slug.as_ref().or(trade.slug.as_ref()) {
            println!(
                "{}",
                format!("Market: https://polymarket.com/event/{}", slug).blue().underline()
            );
        }
        println!(
            "{}",
            format!("TX:     https://polygonscan.com/tx/{}", trade.transaction_hash).blue().underline()
        );
        println!("{}\n", "─".repeat(70).magenta());

        let mut line = format!(
            "TRADE: {} | Side: {} | Amount: ${} | Size: {}",
            Self::format_address(&trade.proxy_wallet),
            trade.side.map(|s| s.as_str()).unwrap_or("-"),
            trade.usdc_size,
            trade.size
        );
        if let Some(price) = trade.price {
            line.push_str(&format!(" | Price: {}", price));
        }
        if let Some(title) = &trade.title {
            line.push_str(&format!(" | Market: {}", title));
        }
        line.push_str(&format!(" | TX: {}", trade.transaction_hash));
        Self::write_to_file(&line);
    }

    pub fn position(label: &str, position: &PositionRecord, previous: Option<&PositionRecord>) {
        println!("\n{}", "─".repeat(70).cyan());
        println!("{}", format!("📈 {}", label).cyan().bold());
        println!("{}", format!("Trader:  {}", Self::format_address(&position.proxy_wallet)).bright_black());
        let market = position.title.as_deref().unwrap_or("Unknown market");
        let outcome = position.outcome.as_deref().unwrap_or("?");
        println!("{}", format!("Market:  {} ({})", market, outcome).bright_black());
        println!(
            "{}",
            format!("Size:    {:.2} @ {:.1}¢", position.size, position.avg_price * 100.0).bright_black()
        );
        match previous {
            Some(old) => println!(
                "{}",
                format!("Value:   ${:.2} → ${:.2}", old.current_value, position.current_value).bright_black()
            ),
            None => println!(
                "{}",
                format!("Value:   ${:.2} (initial ${:.2})", position.current_value, position.initial_value)
                    .bright_black()
            ),
        }
        println!("{}\n", "─".repeat(70).cyan());

        Self::write_to_file(&format!(
            "{}: {} | {} | asset {} | size {} | value {} -> {}",
            label.to_uppercase(),
            Self::format_address(&position.proxy_wallet),
            market,
            position.asset,
            position.size,
            previous.map(|p| p.current_value).unwrap_or(position.initial_value),
            position.current_value
        ));
    }

    pub fn order_result(success: bool, message: &str) {
        if success {
            println!("{} {}", "✓".green(), format!("Order executed: {}", message).green().bold());
            Self::write_to_file(&format!("ORDER SUCCESS: {}", message));
        } else {
            println!("{} {}", "✗".red(), format!("Order failed: {}", message).red().bold());
            Self::write_to_file(&format!("ORDER FAILED: {}", message));
        }
    }

    pub fn order_summary(order: &OrderRequest) -> String {
        format!(
            "{} {:.2} tokens of {} @ {:.3}",
            order.side,
            order.size,
            Self::format_address(&order.token_id),
            order.price
        )
    }

    pub fn skipped(reason: &str) {
        println!("{} {}", "↷".bright_black(), reason.bright_black());
        Self::write_to_file(&format!("SKIPPED: {}", reason));
    }

    pub fn startup(env: &Env) {
        Self::header("🪞 POLYMARKET COPY RELAY");

        println!("{}", "📊 Copying trader:".cyan());
        println!("{}", format!("   {}", env.trader_wallet).bright_black());
        println!("{}", "💼 Mirroring account:".cyan());
        println!("{}", format!("   {}\n", Self::mask_address(&env.funder_address)).bright_black());

        let store = match env.store_backend {
            StoreBackend::Mongo => format!("MongoDB ({})", env.mongo_database),
            StoreBackend::Memory => "in-memory (nothing persisted)".to_string(),
        };
        let source = match env.event_source {
            EventSourceKind::Push => "change streams + reconciliation poller",
            EventSourceKind::Poll => "poller",
        };
        let sizing = &env.sizing;

        println!("{}", "⚙️  Settings:".cyan());
        println!("{}", format!("   Store:          {}", store).bright_black());
        println!("{}", format!("   Events:         {}", source).bright_black());
        println!(
            "{}",
            format!(
                "   Mirror:         {}% of notional (bankroll ${}, clamp {} [{}, {}])",
                sizing.mirror_fraction * 100.0,
                sizing.bankroll,
                sizing.clamp,
                sizing.stake_min,
                sizing.stake_max
            )
            .bright_black()
        );
        println!(
            "{}",
            format!(
                "   Polling:        activity {}s, positions {}s",
                env.activity_poll_interval.as_secs(),
                env.position_poll_interval.as_secs()
            )
            .bright_black()
        );
        if env.preview_mode {
            println!("{}", "   Mode:           PREVIEW (orders are logged, not placed)".yellow().bold());
        } else {
            println!("{}", "   Mode:           LIVE".green().bold());
        }
        println!();

        Self::write_to_file(&format!(
            "STARTUP: trader {} | funder {} | store {} | events {} | fraction {} | clamp {} | preview {}",
            env.trader_wallet,
            Self::mask_address(&env.funder_address),
            store,
            source,
            sizing.mirror_fraction,
            sizing.clamp,
            env.preview_mode
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_shortened_for_display() {
        assert_eq!(
            Logger::format_address("0x1111111111111111111111111111111111112222"),
            "0x1111...2222"
        );
        assert_eq!(Logger::format_address("123"), "123");
        assert_eq!(
            Logger::mask_address("0xabcdef0000000000000000000000000000001234"),
            "0xabcd****1234"
        );
    }

    #[test]
    fn non_ascii_input_is_not_sliced_mid_char() {
        let odd = "aéééééééé";
        assert_eq!(Logger::format_address(odd), odd);
        assert_eq!(Logger::mask_address("ééééééééé"), "ééé****éé");
    }

    #[test]
    fn log_lines_are_appended_to_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");

        append_log_line(&logs, "INFO: first").unwrap();
        append_log_line(&logs, "INFO: second").unwrap();

        let path = log_file_path(&logs, Local::now().date_naive());
        let contents = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("INFO: first"));
        assert!(lines[1].ends_with("INFO: second"));
    }

    #[test]
    fn log_file_is_named_by_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(
            log_file_path(Path::new("logs"), date),
            PathBuf::from("logs/relay-2025-03-09.log")
        );
    }
}
