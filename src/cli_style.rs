use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;

fn colored(color: AnsiColor) -> Style {
    Style::new().bold().fg_color(Some(Color::Ansi(color)))
}

pub fn get_styles() -> Styles {
    clap::builder::Styles::styled()
        .usage(colored(AnsiColor::Cyan).underline())
        .header(colored(AnsiColor::Cyan).underline())
        .literal(colored(AnsiColor::Green))
        .invalid(colored(AnsiColor::Red))
        .error(colored(AnsiColor::Red))
        .valid(colored(AnsiColor::Green))
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

fn print_marked(mark: &str, color: AnsiColor, message: &str) {
    let style = colored(color);
    println!(" {}{} {}{}", style.render(), mark, message, style.render_reset());
}

pub fn print_success(message: &str) {
    print_marked("✓", AnsiColor::Green, message);
}

pub fn print_error(message: &str) {
    print_marked("✗", AnsiColor::Red, message);
}

pub fn print_section_header(title: &str) {
    let style = colored(AnsiColor::Cyan);
    println!();
    println!("{}── {} ──{}", style.render(), title, style.render_reset());
}

pub fn print_key_value(key: &str, value: &str) {
    let dim = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack)));
    println!("  ● {}{}:{} {}", dim.render(), key, dim.render_reset(), value);
}
