use chrono::NaiveDateTime;
use log::warn;
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use scraper::Html;
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

const PROCESSED_FILE_NAME: &str = ".processed";
const SUBJECT_REPLY_PREFIXES: &[&str] = &["re:", "fwd:", "fw:"];

/// One message as handed out by a mail store. Read-only to the rest of the
/// crate; the store owns the underlying data.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub sender: String,
    pub destination: String,
    pub subject: String,
    pub body: String,
    pub date: NaiveDateTime,
    pub thread_id: String,
}

#[derive(Debug, Clone)]
pub struct Thread {
    pub id: String,
    pub subject: String,
    pub last_activity: NaiveDateTime,
}

/// External mail backend. Calls block; any timeout or retry policy belongs
/// to the caller.
pub trait MailStore {
    /// Threads matching a query, oldest activity first, excluding threads
    /// already marked processed.
    fn search(&self, query: &str) -> Result<Vec<Thread>>;

    /// Messages of one thread in arrival order. Fallible per thread.
    fn messages(&self, thread: &Thread) -> Result<Vec<RawMessage>>;

    /// Idempotent; a processed thread stops appearing in `search`.
    fn mark_processed(&self, thread: &Thread) -> Result<()>;
}

/// Mail store over a directory tree of `.eml` files. Messages sharing a
/// normalized subject form one thread. Marking a thread processed records
/// its id in a `.processed` file next to the mail.
pub struct EmlMailStore {
    root: PathBuf,
    threads: Vec<Thread>,
    messages: HashMap<String, Vec<RawMessage>>,
}

impl EmlMailStore {
    /// Scans the directory once at open time; lifecycle is one run.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Mail(format!("not a directory: {}", root.display())));
        }
        let mut store = EmlMailStore {
            root,
            threads: Vec::new(),
            messages: HashMap::new(),
        };
        store.load()?;
        Ok(store)
    }

    fn load(&mut self) -> Result<()> {
        let mut files = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|s| s.to_str())
                    .map(|s| s.eq_ignore_ascii_case("eml"))
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>();
        files.sort();

        for file in &files {
            match parse_eml(file) {
                Ok(mut message) => {
                    let key = normalize_subject(&message.subject);
                    message.thread_id = thread_id(&key);
                    self.messages
                        .entry(message.thread_id.clone())
                        .or_default()
                        .push(message);
                }
                Err(err) => warn!("skipping {}: {err}", file.display()),
            }
        }

        for messages in self.messages.values_mut() {
            messages.sort_by(|a, b| a.date.cmp(&b.date));
        }
        self.threads = self
            .messages
            .values()
            .map(|messages| {
                let newest = messages.last().expect("thread has at least one message");
                Thread {
                    id: newest.thread_id.clone(),
                    subject: messages[0].subject.clone(),
                    last_activity: newest.date,
                }
            })
            .collect();
        self.threads
            .sort_by(|a, b| a.last_activity.cmp(&b.last_activity));
        Ok(())
    }

    fn processed_ids(&self) -> HashSet<String> {
        fs::read_to_string(self.root.join(PROCESSED_FILE_NAME))
            .map(|text| {
                text.lines()
                    .map(|line| line.trim().to_string())
                    .filter(|line| !line.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl MailStore for EmlMailStore {
    fn search(&self, query: &str) -> Result<Vec<Thread>> {
        let processed = self.processed_ids();
        let needle = query.trim().to_lowercase();
        Ok(self
            .threads
            .iter()
            .filter(|t| !processed.contains(&t.id))
            .filter(|t| needle.is_empty() || t.subject.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    fn messages(&self, thread: &Thread) -> Result<Vec<RawMessage>> {
        self.messages
            .get(&thread.id)
            .cloned()
            .ok_or_else(|| Error::Mail(format!("unknown thread {}", thread.id)))
    }

    fn mark_processed(&self, thread: &Thread) -> Result<()> {
        if self.processed_ids().contains(&thread.id) {
            return Ok(());
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(PROCESSED_FILE_NAME))?;
        writeln!(file, "{}", thread.id)?;
        Ok(())
    }
}

fn normalize_subject(subject: &str) -> String {
    let mut text = subject.trim();
    'strip: loop {
        let lower = text.to_lowercase();
        for prefix in SUBJECT_REPLY_PREFIXES {
            if lower.starts_with(prefix) {
                text = text[prefix.len()..].trim_start();
                continue 'strip;
            }
        }
        break;
    }
    text.to_lowercase()
}

fn thread_id(subject_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(subject_key.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    format!("thread_{}", &hex[..12])
}

fn parse_eml(path: &Path) -> Result<RawMessage> {
    let bytes = fs::read(path)?;
    let mail =
        parse_mail(&bytes).map_err(|e| Error::Mail(format!("parse {}: {e}", path.display())))?;
    let headers = &mail.headers;
    let sender = headers.get_first_value("From").unwrap_or_default();
    let destination = headers.get_first_value("To").unwrap_or_default();
    let subject = headers.get_first_value("Subject").unwrap_or_default();
    let id = headers.get_first_value("Message-ID").unwrap_or_else(|| {
        path.file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    });
    let date_raw = headers.get_first_value("Date").unwrap_or_default();
    let epoch = mailparse::dateparse(&date_raw)
        .map_err(|e| Error::Mail(format!("bad Date in {}: {e}", path.display())))?;
    let date = chrono::DateTime::from_timestamp(epoch, 0)
        .ok_or_else(|| Error::Mail(format!("Date out of range in {}", path.display())))?
        .naive_utc();
    let body = extract_best_body(&mail)
        .ok_or_else(|| Error::Mail(format!("no readable body in {}", path.display())))?;
    // sender stays decorated ("Name <addr>"); normalization happens at
    // classification time
    Ok(RawMessage {
        id,
        sender,
        destination,
        subject,
        body,
        date,
        thread_id: String::new(),
    })
}

/// Prefers a plain-text part; falls back to flattening an HTML part to
/// line-oriented text.
fn extract_best_body(mail: &ParsedMail) -> Option<String> {
    fn walk(mail: &ParsedMail, want: &str) -> Option<String> {
        if mail.ctype.mimetype.eq_ignore_ascii_case(want) {
            if let Ok(body) = mail.get_body() {
                return Some(body);
            }
        }
        mail.subparts.iter().find_map(|part| walk(part, want))
    }

    walk(mail, "text/plain").or_else(|| walk(mail, "text/html").map(|html| html_to_text(&html)))
}

fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::new();
    for text in doc.root_element().text() {
        let line = text.trim();
        if line.is_empty() {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}
