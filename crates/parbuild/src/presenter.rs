//! Presentation of aggregated frames.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Stdout, Write};

use crossterm::style::Stylize;
use parbuild_core::{Annotated, BuildStats, LogLine, Progress, WorkerIdentity};
use tracing::debug;

use crate::orchestrator::RunOutcome;

/// Consumer of the aggregated streams of a run.
///
/// Every frame holds one entry per worker, in worker index order.
pub trait Presenter: Send {
    fn progress(&mut self, frame: &[Annotated<Progress>]);
    fn logs(&mut self, frame: &[LogLine]);
    fn watch(&mut self, frame: &[Annotated<BuildStats>]);
    fn ends(&mut self, frame: &[Annotated<BuildStats>]);
    /// Called exactly once, after every worker has been terminated.
    fn dispose(&mut self, outcome: RunOutcome);
}

/// Line-oriented terminal output.
pub struct ConsolePresenter<W: Write + Send = Stdout> {
    out: W,
    silent: bool,
    full_report: bool,
    shown_progress: HashMap<usize, Progress>,
    shown_watch: HashMap<usize, BuildStats>,
    /// Highest log sequence number handled per worker.
    last_log_seq: HashMap<usize, u64>,
    /// Lines for the full report, keyed by (worker index, sequence number).
    /// Only filled when a full report was asked for.
    report_logs: BTreeMap<(usize, u64), LogLine>,
}

impl ConsolePresenter<Stdout> {
    pub fn stdout(silent: bool, full_report: bool) -> Self {
        Self::new(io::stdout(), silent, full_report)
    }
}

impl<W: Write + Send> ConsolePresenter<W> {
    pub fn new(out: W, silent: bool, full_report: bool) -> Self {
        Self {
            out,
            silent,
            full_report,
            shown_progress: HashMap::new(),
            shown_watch: HashMap::new(),
            last_log_seq: HashMap::new(),
            report_logs: BTreeMap::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_progress(&mut self, frame: &[Annotated<Progress>]) -> io::Result<()> {
        for entry in frame {
            let index = entry.identity.index;
            if self
                .shown_progress
                .get(&index)
                .is_some_and(|shown| shown.same_report(&entry.payload))
            {
                continue;
            }
            let progress = &entry.payload;
            let percent = format!("{:>3}%", (progress.percent * 100.0).round() as u32);
            let percent = if progress.is_complete() {
                percent.green()
            } else {
                percent.cyan()
            };
            write!(self.out, "{} {percent} {}", label(&entry.identity), progress.message)?;
            if !progress.step.is_empty() {
                write!(self.out, " {}", progress.step.as_str().dim())?;
            }
            writeln!(self.out)?;
            self.shown_progress.insert(index, progress.clone());
        }
        Ok(())
    }

    fn write_logs(&mut self, frame: &[LogLine]) -> io::Result<()> {
        for line in frame {
            let index = line.identity.index;
            if self.last_log_seq.get(&index).is_some_and(|&last| line.seq <= last) {
                continue;
            }
            self.last_log_seq.insert(index, line.seq);
            if self.full_report {
                self.report_logs.insert((index, line.seq), line.clone());
            }
            if !self.silent {
                write_log_line(&mut self.out, line)?;
            }
        }
        Ok(())
    }

    fn write_watch(&mut self, frame: &[Annotated<BuildStats>]) -> io::Result<()> {
        for entry in frame {
            let index = entry.identity.index;
            if self.shown_watch.get(&index) == Some(&entry.payload) {
                continue;
            }
            write_stats(&mut self.out, &entry.identity, &entry.payload)?;
            self.shown_watch.insert(index, entry.payload.clone());
        }
        Ok(())
    }

    fn write_ends(&mut self, frame: &[Annotated<BuildStats>]) -> io::Result<()> {
        for entry in frame {
            write_stats(&mut self.out, &entry.identity, &entry.payload)?;
        }
        let failed = frame.iter().filter(|e| !e.payload.is_success()).count();
        writeln!(
            self.out,
            "{} builds: {} succeeded, {} failed",
            frame.len(),
            frame.len() - failed,
            failed
        )
    }

    fn write_dispose(&mut self, outcome: RunOutcome) -> io::Result<()> {
        if self.full_report && outcome != RunOutcome::Cancelled {
            writeln!(self.out, "{}", "Full report".bold())?;
            for line in self.report_logs.values() {
                write_log_line(&mut self.out, line)?;
            }
        }
        let summary = match outcome {
            RunOutcome::Succeeded => "Build succeeded".green(),
            RunOutcome::Failed => "Build failed".red(),
            RunOutcome::Cancelled => "Cancelled".yellow(),
            RunOutcome::Incomplete => "A worker exited without reporting a result".red(),
        };
        writeln!(self.out, "{summary}")?;
        self.out.flush()
    }
}

impl<W: Write + Send> Presenter for ConsolePresenter<W> {
    fn progress(&mut self, frame: &[Annotated<Progress>]) {
        report(self.write_progress(frame));
    }

    fn logs(&mut self, frame: &[LogLine]) {
        report(self.write_logs(frame));
    }

    fn watch(&mut self, frame: &[Annotated<BuildStats>]) {
        report(self.write_watch(frame));
    }

    fn ends(&mut self, frame: &[Annotated<BuildStats>]) {
        report(self.write_ends(frame));
    }

    fn dispose(&mut self, outcome: RunOutcome) {
        report(self.write_dispose(outcome));
    }
}

fn report(result: io::Result<()>) {
    if let Err(e) = result {
        debug!(error = %e, "Failed to write to the terminal");
    }
}

fn label(identity: &WorkerIdentity) -> String {
    format!("[{}]", identity.name)
}

fn write_log_line(out: &mut impl Write, line: &LogLine) -> io::Result<()> {
    let label = label(&line.identity);
    if line.is_error() {
        writeln!(out, "{} {}", label.dim(), line.text.as_str().red())
    } else {
        writeln!(out, "{} {}", label.dim(), line.text)
    }
}

fn write_stats(out: &mut impl Write, identity: &WorkerIdentity, stats: &BuildStats) -> io::Result<()> {
    let label = label(identity);
    if stats.errors.is_empty() && stats.warnings.is_empty() {
        writeln!(out, "{} {}", label.as_str().bold(), "compiled cleanly".green())?;
    } else {
        writeln!(
            out,
            "{} {} errors, {} warnings",
            label.as_str().bold(),
            stats.errors.len(),
            stats.warnings.len()
        )?;
    }
    for error in &stats.errors {
        writeln!(out, "  {}", error.as_str().red())?;
    }
    for warning in &stats.warnings {
        writeln!(out, "  {}", warning.as_str().yellow())?;
    }
    if !stats.modules.is_empty() {
        let mut modules = stats.modules.join(", ");
        if stats.filtered_modules > 0 {
            modules.push_str(&format!(" (+{} not built)", stats.filtered_modules));
        }
        writeln!(out, "  {}", modules.as_str().dim())?;
    }
    Ok(())
}
