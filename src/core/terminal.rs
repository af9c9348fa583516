use console::{Emoji, style};

pub static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

/// One-line phase and progress readout, redrawn in place.
pub fn print_progress(phase: &str, progress: u8, msg: &str) {
    let filled = usize::from(progress.min(100)) / 5;
    let bar = format!("{}{}", "#".repeat(filled), "-".repeat(20 - filled));
    print!(
        "\r\x1b[2K{} {:<6} [{}] {:>3}% {}",
        PACKAGE,
        style(phase).bold().cyan(),
        style(bar).green(),
        progress,
        style(msg).dim()
    );
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

pub fn print_banner() {
    println!();
    println!(
        "{}{}",
        PACKAGE,
        style("labdrop").bold().cyan()
    );
    println!(
        "{}\n",
        style("Fetch lab images and drop them onto your EVE host.").dim()
    );
}

enum GuideLine {
    Command(String, String),
    Status(String, String),
    Text(String),
    Blank,
}

/// A titled block of aligned command or status lines for help screens.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines
            .push(GuideLine::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Text(text.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    pub fn print(&self) {
        println!("\n {}", style(&self.title).bold().underlined());
        let width = self
            .lines
            .iter()
            .filter_map(|line| match line {
                GuideLine::Command(name, _) => Some(name.len()),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        for line in &self.lines {
            match line {
                GuideLine::Command(name, description) => println!(
                    "   {}  {}",
                    style(format!("{name:<width$}")).green(),
                    description
                ),
                GuideLine::Status(label, value) => print_status(label, value),
                GuideLine::Text(text) => println!("   {text}"),
                GuideLine::Blank => println!(),
            }
        }
    }
}

pub fn print_goodbye() {
    println!("\n{} {}", SPARKLE, style("Done.").bold().cyan());
}
