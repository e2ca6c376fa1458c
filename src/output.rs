use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::app::{CrawlResult, ProgressEvent, ProgressSink, RecoverResult};
use crate::dedupe::DedupeReport;
use crate::summary::Summary;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Console,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_crawl(result: &CrawlResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_dedupe(result: &DedupeReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_summary(result: &Summary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_recover(result: &RecoverResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// One progress bar per batch on stderr.
pub struct ConsoleProgress {
    bar: Mutex<Option<ProgressBar>>,
    style: ProgressStyle,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let style = ProgressStyle::with_template(
            "  {msg} {wide_bar:.cyan/dim} {pos}/{len} {percent}% [{elapsed_precise} < {eta}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
        Self {
            bar: Mutex::new(None),
            style,
        }
    }

    fn with_bar(&self, f: impl FnOnce(&mut Option<ProgressBar>)) {
        if let Ok(mut bar) = self.bar.lock() {
            f(&mut bar);
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::InputLoaded {
                ids,
                duplicates_removed,
            } => {
                if duplicates_removed > 0 {
                    eprintln!("Removed {duplicates_removed} duplicate ids at input stage.");
                }
                eprintln!("Loaded {ids} ids.");
            }
            ProgressEvent::RunPlanned {
                total,
                already_done,
                remaining,
            } => {
                eprintln!("Total ids: {total} | Already done: {already_done} | Remaining: {remaining}");
            }
            ProgressEvent::BatchStarted {
                batch,
                batches,
                size,
            } => self.with_bar(|slot| {
                let bar = ProgressBar::new(size as u64);
                bar.set_style(self.style.clone());
                bar.set_message(format!("Batch {batch}/{batches}"));
                bar.enable_steady_tick(Duration::from_millis(250));
                *slot = Some(bar);
            }),
            ProgressEvent::RecordCompleted { completed, .. } => self.with_bar(|slot| {
                if let Some(bar) = slot.as_ref() {
                    bar.set_position(completed as u64);
                }
            }),
            ProgressEvent::BatchFinished { .. } => self.with_bar(|slot| {
                if let Some(bar) = slot.take() {
                    bar.finish();
                }
            }),
            ProgressEvent::Deduplicated {
                rows_before,
                rows_after,
            } => {
                eprintln!("Deduplicated output: {rows_before} rows -> {rows_after} rows.");
            }
        }
    }
}

pub fn print_summary(summary: &Summary) {
    println!();
    println!("========== Crawl Summary ==========");
    println!("Total products: {}", summary.total);
    println!("Complete: {}", summary.complete);
    println!("Failures: {}", summary.failures);
    println!(
        "Products with missing fields (still counted as complete): {}",
        summary.with_missing_fields
    );
    if !summary.failure_categories.is_empty() {
        println!("Logged failures:");
        for (category, count) in &summary.failure_categories {
            println!("  {category}: {count}");
        }
    }
    println!("===================================");
}
