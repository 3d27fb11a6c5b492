//! Record sinks
//!
//! A [`RecordSink`] appends a slice of [`ProductRecord`]s to durable storage.
//! Both file sinks read the whole existing file, add the new records and
//! rewrite it, so calling `append` twice with the same records stores them
//! twice. Files are written to a temporary sibling and renamed into place,
//! which leaves the previous content intact if a write fails halfway.
//!
//! [`SinkSet`] fans a batch out to every configured sink. A failing sink is
//! logged and does not stop the others or the run; the records it did not
//! store are not retried.

use crate::config::OutputConfig;
use crate::error::{Error, Result};
use crate::transform::ProductRecord;
use async_trait::async_trait;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::Value;
use std::path::{Path, PathBuf};

const XML_ROOT: &str = "products";
const XML_ITEM: &str = "product";

/// Destination for transformed records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Append `records` after whatever the sink already holds
    async fn append(&self, records: &[ProductRecord]) -> Result<()>;
}

/// JSON file holding a single array of records
#[derive(Debug, Clone)]
pub struct JsonArraySink {
    path: PathBuf,
}

impl JsonArraySink {
    /// Sink writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Output file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<Value>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        match serde_json::from_slice::<Value>(&content) {
            Ok(Value::Array(existing)) => Ok(existing),
            Ok(_) => Err(Error::Sink {
                path: self.path.clone(),
                reason: "existing content is not a JSON array".to_string(),
            }),
            Err(e) => Err(Error::Sink {
                path: self.path.clone(),
                reason: format!("existing content is not valid JSON: {e}"),
            }),
        }
    }
}

#[async_trait]
impl RecordSink for JsonArraySink {
    fn name(&self) -> &str {
        "json"
    }

    async fn append(&self, records: &[ProductRecord]) -> Result<()> {
        if records.is_empty() {
            tracing::warn!(path = %self.path.display(), "no records to append");
            return Ok(());
        }

        let mut all = self.load().await?;
        let existing = all.len();
        for record in records {
            all.push(serde_json::to_value(record)?);
        }

        let mut body = serde_json::to_vec_pretty(&all)?;
        body.push(b'\n');
        replace_file(&self.path, &body).await?;

        tracing::info!(
            path = %self.path.display(),
            appended = records.len(),
            total = existing + records.len(),
            "records appended"
        );
        Ok(())
    }
}

/// One `<product>` element as `(element name, text)` pairs
type XmlItem = Vec<(String, String)>;

/// XML document with a `<products>` root and one `<product>` per record
#[derive(Debug, Clone)]
pub struct XmlDocumentSink {
    path: PathBuf,
}

impl XmlDocumentSink {
    /// Sink writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Output file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<XmlItem>> {
        match tokio::fs::read(&self.path).await {
            Ok(content) if content.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(content) => parse_document(&content).map_err(|e| match e {
                Error::Sink { reason, .. } => Error::Sink {
                    path: self.path.clone(),
                    reason,
                },
                other => Error::Sink {
                    path: self.path.clone(),
                    reason: other.to_string(),
                },
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RecordSink for XmlDocumentSink {
    fn name(&self) -> &str {
        "xml"
    }

    async fn append(&self, records: &[ProductRecord]) -> Result<()> {
        if records.is_empty() {
            tracing::warn!(path = %self.path.display(), "no records to append");
            return Ok(());
        }

        let mut items = self.load().await?;
        let existing = items.len();
        items.extend(records.iter().map(|record| {
            record
                .fields()
                .iter()
                .map(|(title, value)| (element_name(title), (*value).to_string()))
                .collect::<XmlItem>()
        }));

        let body = render_document(&items)?;
        replace_file(&self.path, &body).await?;

        tracing::info!(
            path = %self.path.display(),
            appended = records.len(),
            total = existing + records.len(),
            "records appended"
        );
        Ok(())
    }
}

/// XML element name for a record column title
///
/// ```
/// use catalog_harvester::sink::element_name;
///
/// assert_eq!(element_name("Category ID"), "Category_ID");
/// assert_eq!(element_name("360 Images"), "three_sixty_Images");
/// ```
pub fn element_name(title: &str) -> String {
    title.replace(' ', "_").replace("360", "three_sixty")
}

fn parse_document(content: &[u8]) -> Result<Vec<XmlItem>> {
    // Field text is kept as written; whitespace between elements is only indentation
    let mut reader = Reader::from_reader(content);

    let mut items = Vec::new();
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut field: Option<(String, String)> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    1 if name != XML_ROOT => {
                        return Err(Error::Sink {
                            path: PathBuf::new(),
                            reason: format!("unexpected root element <{name}>"),
                        });
                    }
                    2 => items.push(XmlItem::new()),
                    3 => field = Some((name, String::new())),
                    _ => {}
                }
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    // Self-closing root: empty document
                    0 if name == XML_ROOT => {}
                    1 => items.push(XmlItem::new()),
                    2 => {
                        if let Some(item) = items.last_mut() {
                            item.push((name, String::new()));
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) if depth == 3 => {
                if let Some((_, value)) = field.as_mut() {
                    value.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) if depth == 3 => {
                if let Some((_, value)) = field.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                if depth == 3
                    && let Some(done) = field.take()
                    && let Some(item) = items.last_mut()
                {
                    item.push(done);
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

fn render_document(items: &[XmlItem]) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new(XML_ROOT)))?;

    for item in items {
        writer.write_event(Event::Start(BytesStart::new(XML_ITEM)))?;
        for (name, value) in item {
            if value.is_empty() {
                writer.write_event(Event::Empty(BytesStart::new(name.as_str())))?;
            } else {
                writer.write_event(Event::Start(BytesStart::new(name.as_str())))?;
                writer.write_event(Event::Text(BytesText::new(value)))?;
                writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
            }
        }
        writer.write_event(Event::End(BytesEnd::new(XML_ITEM)))?;
    }

    writer.write_event(Event::End(BytesEnd::new(XML_ROOT)))?;
    let mut body = writer.into_inner();
    body.push(b'\n');
    Ok(body)
}

async fn replace_file(path: &Path, body: &[u8]) -> Result<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    tokio::fs::write(&staging, body).await?;
    tokio::fs::rename(&staging, path).await?;
    Ok(())
}

/// Every configured sink, written in order
pub struct SinkSet {
    sinks: Vec<Box<dyn RecordSink>>,
}

impl SinkSet {
    /// Wrap an explicit list of sinks
    pub fn new(sinks: Vec<Box<dyn RecordSink>>) -> Self {
        Self { sinks }
    }

    /// Build the JSON and XML sinks enabled in `config`, creating the output directory
    pub fn from_config(config: &OutputConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.directory).map_err(|e| Error::Config {
            message: format!(
                "cannot create output directory {}: {}",
                config.directory.display(),
                e
            ),
            key: Some("output.directory".to_string()),
        })?;

        let mut sinks: Vec<Box<dyn RecordSink>> = Vec::new();
        if config.write_json {
            sinks.push(Box::new(JsonArraySink::new(config.json_path())));
        }
        if config.write_xml {
            sinks.push(Box::new(XmlDocumentSink::new(config.xml_path())));
        }
        if sinks.is_empty() {
            tracing::warn!("no output sinks enabled, records will be discarded");
        }
        Ok(Self::new(sinks))
    }

    /// Number of sinks in the set
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether the set has no sinks
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Append `records` to every sink, returning how many sinks succeeded
    pub async fn append(&self, records: &[ProductRecord]) -> usize {
        let mut stored = 0;
        for sink in &self.sinks {
            match sink.append(records).await {
                Ok(()) => stored += 1,
                Err(e) => {
                    tracing::error!(
                        sink = sink.name(),
                        records = records.len(),
                        error = %e,
                        "failed to persist records"
                    );
                }
            }
        }
        stored
    }
}
