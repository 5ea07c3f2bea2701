use std::io::{self, Write};

use serde::Serialize;

use crate::manager::{
    CleanResult, DownloadResult, ExtractResult, FindResult, ProgressEvent, ProgressSink,
};
use crate::mylist::Mylist;
use crate::points::PointsOutcome;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_extract(result: &ExtractResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_find(result: &FindResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clean(result: &CleanResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_mylists(lists: &[Mylist]) -> io::Result<()> {
        Self::print_json(&lists)
    }

    pub fn print_points(outcome: &PointsOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Machine-readable runs stay silent until the final document; progress
/// still reaches the log through `tracing`.
impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
