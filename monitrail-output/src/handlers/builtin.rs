//! Built-in handlers
//!
//! `Console` writes to stdout, `TextFile` appends to a file. Both write either
//! one JSON object per line or a human readable line.

use super::{Handler, HandlerError};
use crate::event::GrandOutputEventInfo;
use monitrail_entry::EntryKind;
use monitrail_route::HandlerConfiguration;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error};

/// Line format of the built-in handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown format '{}' (expected Text or Json)", other)),
        }
    }
}

impl OutputFormat {
    fn from_config(config: &HandlerConfiguration, default: OutputFormat) -> Result<Self, HandlerError> {
        match config.attribute("Format") {
            None => Ok(default),
            Some(value) => value.parse().map_err(|reason| HandlerError::Config {
                handler: config.name.clone(),
                reason,
            }),
        }
    }

    /// Render one event, without the trailing newline
    pub fn render(&self, event: &GrandOutputEventInfo) -> Result<String, HandlerError> {
        match self {
            OutputFormat::Json => Ok(serde_json::to_string(&event.as_json_line())?),
            OutputFormat::Text => Ok(render_text(event)),
        }
    }
}

/// `2024-05-01 08h00.00.0000000 Info  [Sql] |  > Opening group`
fn render_text(event: &GrandOutputEventInfo) -> String {
    let entry = &event.entry;
    let marker = match entry.kind {
        EntryKind::Line => "",
        EntryKind::OpenGroup => "> ",
        EntryKind::CloseGroup => "< ",
    };
    let mut line = format!(
        "{} {:<5} [{}] {}{}{}",
        entry.timestamp,
        entry.level,
        event.topic,
        "|  ".repeat(entry.group_depth),
        marker,
        entry.text
    );
    if !entry.tags.is_empty() {
        line.push_str(&format!(" {{{}}}", entry.tags));
    }
    let mut exception = entry.exception.as_ref();
    while let Some(ex) = exception {
        line.push_str(&format!(" | {}: {}", ex.type_name, ex.message));
        exception = ex.inner.as_deref();
    }
    line
}

/// Writes events to stdout
pub struct ConsoleHandler {
    name: String,
    format: OutputFormat,
}

impl ConsoleHandler {
    pub fn new(name: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            name: name.into(),
            format,
        }
    }

    /// Attributes: `Format` (Text, the default, or Json)
    pub fn from_config(config: &HandlerConfiguration) -> Result<Self, HandlerError> {
        Ok(Self::new(config.name.clone(), OutputFormat::from_config(config, OutputFormat::Text)?))
    }
}

impl Handler for ConsoleHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &GrandOutputEventInfo, _last_chance: bool) -> Result<(), HandlerError> {
        let line = self.format.render(event)?;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{}", line)?;
        Ok(())
    }
}

/// Appends events to a file
pub struct TextFileHandler {
    name: String,
    path: PathBuf,
    format: OutputFormat,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl TextFileHandler {
    /// Open (or create) `path` for appending; missing directories are created
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>, format: OutputFormat) -> Result<Self, HandlerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "Text file handler opened");
        Ok(Self {
            name: name.into(),
            path,
            format,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    /// Attributes: `Path` (required), `Format` (Json, the default, or Text)
    pub fn from_config(config: &HandlerConfiguration) -> Result<Self, HandlerError> {
        let path = config.attribute("Path").ok_or_else(|| HandlerError::Config {
            handler: config.name.clone(),
            reason: "missing Path attribute".to_string(),
        })?;
        let format = OutputFormat::from_config(config, OutputFormat::Json)?;
        Self::open(config.name.clone(), path, format)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Handler for TextFileHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &GrandOutputEventInfo, _last_chance: bool) -> Result<(), HandlerError> {
        let line = self.format.render(event)?;
        let mut writer = self.writer.lock();
        let Some(out) = writer.as_mut() else {
            return Err(HandlerError::Failed(format!("'{}' is closed", self.name)));
        };
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }

    fn close(&self) {
        if let Some(mut out) = self.writer.lock().take() {
            if let Err(e) = out.flush() {
                error!(path = %self.path.display(), error = %e, "Failed to flush log file");
            }
        }
    }
}
