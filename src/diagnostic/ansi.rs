use super::{Diagnostic, Severity};

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn bold(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold_red(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;31m{s}\x1b[0m") } else { s.to_string() }
    }

    fn cyan(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[36m{s}\x1b[0m") } else { s.to_string() }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[2m{s}\x1b[0m") } else { s.to_string() }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "error[SJ-R002]: message"
        let severity = match d.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        let head = match d.code {
            Some(code) => format!("{severity}[{code}]"),
            None => severity.to_string(),
        };
        let head = match d.severity {
            Severity::Error => self.bold_red(&head),
            Severity::Warning => self.bold(&self.cyan(&head)),
        };
        out.push_str(&format!("{}: {}\n", head, self.bold(&d.message)));

        // "  --> input.json:4"
        match (&d.source, d.line) {
            (Some(source), Some(line)) => out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), source, line)),
            (None, Some(line)) => out.push_str(&format!("  {} line {}\n", self.cyan("-->"), line)),
            (Some(source), None) => out.push_str(&format!("  {} {}\n", self.cyan("-->"), source)),
            (None, None) => {}
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }

        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} suggestion: {}\n", self.dim("="), suggestion));
        }

        out
    }
}
