use colored::{Color, Colorize};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::{self, Stdout, Write};

use muster_core::{Blocker, ServiceStatus};

/// Prints service output and supervisor messages, one prefixed line at a time.
pub struct Logger<W: Write = Stdout> {
    output: W,
}

impl<W: Write> Logger<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    fn string_to_color(s: &str) -> Color {
        let colors = [
            Color::Green,
            Color::Blue,
            Color::Magenta,
            Color::Cyan,
            Color::BrightGreen,
            Color::BrightBlue,
            Color::BrightMagenta,
            Color::BrightCyan,
        ];

        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        let hash = hasher.finish();

        let idx = usize::try_from(hash).unwrap_or_default() % colors.len();
        colors[idx]
    }

    fn write_lines(&mut self, prefix: &str, message: &str) {
        for line in message.lines() {
            let _ = writeln!(self.output, "{prefix} {line}");
        }
    }

    pub fn log(&mut self, service_name: &str, message: &str) {
        let prefix = format!("[{service_name}]")
            .color(Self::string_to_color(service_name))
            .to_string();
        self.write_lines(&prefix, message);
    }

    pub fn system(&mut self, message: &str) {
        let prefix = "[muster]".color(Color::Red).to_string();
        self.write_lines(&prefix, message);
    }

    pub fn error(&mut self, message: &str) {
        let prefix = "[muster]".color(Color::Red).to_string();
        let message = message.red().bold().to_string();
        self.write_lines(&prefix, &message);
    }

    pub fn status(&mut self, service_name: &str, from: ServiceStatus, to: ServiceStatus) {
        let service = service_name.color(Self::string_to_color(service_name));
        let to = match to {
            ServiceStatus::Healthy => to.to_string().green(),
            ServiceStatus::Unhealthy | ServiceStatus::Stopped => to.to_string().red(),
            _ => to.to_string().yellow(),
        };
        self.system(&format!("{service}: {from} -> {to}"));
    }

    pub fn blocked(&mut self, service_name: &str, blockers: &[Blocker]) {
        let waiting = blockers
            .iter()
            .map(|b| {
                let mut s = format!("{} is {} (wants {})", b.service, b.status, b.condition);
                if b.unsatisfiable {
                    s.push_str(", will not recover");
                }
                s
            })
            .collect::<Vec<_>>()
            .join("; ");
        self.error(&format!("{service_name} is blocked: {waiting}"));
    }
}

impl Logger {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}
