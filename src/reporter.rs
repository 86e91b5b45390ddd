//! Collects per-context outcomes and prints them as a table at the end of a run.
use std::fmt;
use std::io::{self, Write};

const HEADERS: [&str; 3] = ["CONTEXT NAME", "STATUS", "MESSAGE"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one context
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub context: String,
    pub status: Status,
    pub message: String,
}

/// Sink for outcomes.
///
/// Records are kept in the order they arrive; the same context recorded twice
/// shows up twice.
pub trait Reporter {
    fn record(&mut self, context: &str, status: Status, message: &str);

    fn outcomes(&self) -> &[Outcome];

    /// Write the summary of everything recorded so far
    fn render(&self, out: &mut dyn Write) -> io::Result<()>;
}

/// [`Reporter`] that renders a bordered table
#[derive(Clone, Debug, Default)]
pub struct TableReporter {
    outcomes: Vec<Outcome>,
}

impl TableReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for TableReporter {
    fn record(&mut self, context: &str, status: Status, message: &str) {
        self.outcomes.push(Outcome {
            context: context.to_string(),
            status,
            message: message.to_string(),
        });
    }

    fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        let rows: Vec<[Vec<&str>; 3]> = self
            .outcomes
            .iter()
            .map(|o| [cell_lines(&o.context), vec![o.status.as_str()], cell_lines(&o.message)])
            .collect();

        let mut widths: Vec<usize> = HEADERS.iter().map(|h| h.chars().count()).collect();
        for row in &rows {
            for (i, cell) in row.iter().enumerate() {
                for line in cell {
                    widths[i] = widths[i].max(line.chars().count());
                }
            }
        }

        let separator = separator(&widths);
        writeln!(out, "{}", separator)?;
        write_row(out, &widths, &HEADERS.map(|h| vec![h]))?;
        writeln!(out, "{}", separator)?;
        for row in &rows {
            write_row(out, &widths, row)?;
            writeln!(out, "{}", separator)?;
        }
        out.flush()
    }
}

fn cell_lines(text: &str) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        vec![""]
    } else {
        lines
    }
}

fn separator(widths: &[usize]) -> String {
    let mut line = String::from("+");
    for width in widths {
        line.push_str(&"-".repeat(width + 2));
        line.push('+');
    }
    line
}

fn write_row(out: &mut dyn Write, widths: &[usize], cells: &[Vec<&str>; 3]) -> io::Result<()> {
    let height = cells.iter().map(Vec::len).max().unwrap_or(1);
    for i in 0..height {
        write!(out, "|")?;
        for (cell, width) in cells.iter().zip(widths) {
            let text = cell.get(i).copied().unwrap_or("");
            let pad = width - text.chars().count();
            write!(out, " {}{} |", text, " ".repeat(pad))?;
        }
        writeln!(out)?;
    }
    Ok(())
}
