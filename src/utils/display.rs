use crate::core::context::ContextUsage;
use colored::*;

const RULE_WIDTH: usize = 80;
const BAR_WIDTH: usize = 40;

pub fn print_rule(title: &str, color: Color) {
    let label = format!(" {} ", title);
    let side = RULE_WIDTH.saturating_sub(label.chars().count()) / 2;
    let line = "─".repeat(side);
    println!(
        "\n{}{}{}",
        line.color(color),
        label.color(color).bold(),
        line.color(color)
    );
}

/// Boxed block with the title set into the top border
pub fn print_panel(title: &str, body: &str, color: Color) {
    println!("{}", render_panel(title, body).color(color));
}

pub(crate) fn render_panel(title: &str, body: &str) -> String {
    let lines: Vec<&str> = if body.is_empty() {
        vec![""]
    } else {
        body.lines().collect()
    };
    let inner = lines
        .iter()
        .map(|l| l.chars().count())
        .chain(std::iter::once(title.chars().count() + 2))
        .max()
        .unwrap_or(0);

    let title_part = format!(" {} ", title);
    let mut out = format!(
        "╭─{}{}╮\n",
        title_part,
        "─".repeat(inner + 1 - title_part.chars().count())
    );
    for line in lines {
        out.push_str(&format!(
            "│ {}{} │\n",
            line,
            " ".repeat(inner - line.chars().count())
        ));
    }
    out.push_str(&format!("╰{}╯", "─".repeat(inner + 2)));
    out
}

/// Line-numbered listing for commands about to run
pub fn numbered(code: &str) -> String {
    code.lines()
        .enumerate()
        .map(|(i, line)| format!("{:>3}  {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn print_context_usage(usage: &ContextUsage) {
    println!(
        "{}",
        format!(
            "Context Utilization: {} / {} tokens ({:.2}%)",
            usage.estimated_tokens, usage.window, usage.percentage
        )
        .cyan()
    );
    let filled = ((usage.percentage / 100.0) * BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    println!(
        "{}{}",
        "━".repeat(filled).magenta(),
        "━".repeat(BAR_WIDTH - filled).bright_black()
    );
}

pub fn print_status(text: &str) {
    println!("{}", text.green().bold());
}

pub fn print_success(text: &str) {
    println!("{}", text.green());
}

pub fn print_error(text: &str) {
    eprintln!("{}", text.red().bold());
}

pub fn print_info(text: &str) {
    println!("{}", text.blue());
}
