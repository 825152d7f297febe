// ============================================================================
// src/ui.rs – Console presentation (banner, status lines, data panels)
// ============================================================================

use console::Style;
use dialoguer::Confirm;

pub const BANNER_BODY_WIDTH: usize = 58;

/// Styled console output. `quiet` drops everything except warnings and
/// errors; machine-readable output (JSON, reports) bypasses this type.
#[derive(Debug, Clone, Default)]
pub struct UX {
    quiet: bool,
}

impl UX {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn banner(&self) {
        if self.quiet {
            return;
        }
        let frame = Style::new().color256(39).bold();
        let span = "═".repeat(BANNER_BODY_WIDTH + 2);
        let title = format!("{:^width$}", "SYSTEM MAINTENANCE", width = BANNER_BODY_WIDTH + 2);
        let sub = format!(
            "{:^width$}",
            "EFI · drives · kexts",
            width = BANNER_BODY_WIDTH + 2
        );
        println!("{}", frame.apply_to(format!("╔{span}╗")));
        println!("{}", frame.apply_to(format!("║{title}║")));
        println!("{}", frame.apply_to(format!("║{sub}║")));
        println!("{}", frame.apply_to(format!("╚{span}╝")));
    }

    pub fn phase(&self, title: &str) {
        if !self.quiet {
            println!("\n{}", Style::new().color256(45).bold().apply_to(format!("▶ {title}")));
        }
    }

    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("  {msg}");
        }
    }

    pub fn note(&self, msg: &str) {
        if !self.quiet {
            println!("  {}", Style::new().dim().apply_to(msg));
        }
    }

    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{} {msg}", Style::new().green().bold().apply_to("✔"));
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{} {msg}", Style::new().yellow().bold().apply_to("⚠"));
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{} {msg}", Style::new().red().bold().apply_to("✖"));
    }

    /// Failure title plus the text telling the user what to try next.
    pub fn remediation(&self, title: &str, body: &str) {
        self.error(title);
        for line in body.lines() {
            eprintln!("    {line}");
        }
    }

    pub fn data_panel(&self, title: &str, rows: &[(&str, String)]) {
        if self.quiet {
            return;
        }
        let label_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let heading = Style::new().color256(45).bold();
        let key = Style::new().color256(250);
        println!("{}", heading.apply_to(format!("┌─ {title}")));
        for (k, v) in rows {
            println!("│ {} {v}", key.apply_to(format!("{k:<label_width$}")));
        }
        println!("{}", heading.apply_to("└─"));
    }

    /// Yes/no gate for destructive actions; `assume_yes` skips the prompt.
    pub fn confirm(&self, prompt: &str, assume_yes: bool) -> anyhow::Result<bool> {
        if assume_yes {
            return Ok(true);
        }
        Ok(Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?)
    }
}
