// Small stateless utilities used by the client and the backend.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use tokio::task::JoinHandle;

use crate::constants::DEFAULT_TRUNCATE_LENGTH;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// `<prefix>_<unix millis>_<9 base36 chars>`. Not suitable as a secret.
fn generate_id(prefix: &str) -> String {
    format!(
        "{}_{}_{}",
        prefix,
        Utc::now().timestamp_millis(),
        random_suffix(9)
    )
}

pub fn generate_user_id() -> String {
    generate_id("user")
}

pub fn generate_chat_id() -> String {
    generate_id("chat")
}

pub fn generate_message_id() -> String {
    generate_id("msg")
}

/// Hours and minutes, e.g. `09:05`.
pub fn format_timestamp<Tz: TimeZone>(timestamp: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    timestamp.format("%H:%M").to_string()
}

pub fn format_date<Tz: TimeZone>(timestamp: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    timestamp.format("%x").to_string()
}

/// Cuts `text` to `max_length` characters and appends `...` when it was longer.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    match text.char_indices().nth(max_length) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}...", &text[..cut]),
    }
}

pub fn truncate_default(text: &str) -> String {
    truncate_text(text, DEFAULT_TRUNCATE_LENGTH)
}

pub fn is_valid_url(candidate: &str) -> bool {
    url::Url::parse(candidate).is_ok()
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Plain data as handled by [`deep_clone`]. `Opaque` holds anything that is
/// not plain data; it is shared rather than copied.
#[derive(Debug)]
pub enum PlainValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Date(Box<DateTime<Utc>>),
    List(Vec<PlainValue>),
    Map(BTreeMap<String, PlainValue>),
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl PartialEq for PlainValue {
    fn eq(&self, other: &Self) -> bool {
        use PlainValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Number(a), Number(b)) => a == b,
            (Text(a), Text(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Opaque(a), Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Recursively copies lists, maps and dates. Values are trees, so there is
/// nothing to cycle-detect.
pub fn deep_clone(value: &PlainValue) -> PlainValue {
    match value {
        PlainValue::Null => PlainValue::Null,
        PlainValue::Bool(b) => PlainValue::Bool(*b),
        PlainValue::Number(n) => PlainValue::Number(*n),
        PlainValue::Text(s) => PlainValue::Text(s.clone()),
        PlainValue::Date(d) => PlainValue::Date(Box::new(**d)),
        PlainValue::List(items) => PlainValue::List(items.iter().map(deep_clone).collect()),
        PlainValue::Map(entries) => PlainValue::Map(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), deep_clone(value)))
                .collect(),
        ),
        PlainValue::Opaque(shared) => PlainValue::Opaque(Arc::clone(shared)),
    }
}

/// Runs the wrapped function once the calls have been quiet for `delay`,
/// with the arguments of the most recent call.
pub struct Debouncer<T> {
    delay: Duration,
    func: Arc<dyn Fn(T) + Send + Sync>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(func: F, delay: Duration) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            delay,
            func: Arc::new(func),
            pending: Mutex::new(None),
        }
    }

    /// Must be called from within a Tokio runtime.
    pub fn call(&self, args: T) {
        // Spawn under the lock so the last caller's task is the one kept.
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        let func = Arc::clone(&self.func);
        let delay = self.delay;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            func(args);
        }));
    }

    pub fn cancel(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(task) = pending.take() {
                task.abort();
            }
        }
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(task) = pending.take() {
                task.abort();
            }
        }
    }
}
