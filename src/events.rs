//! Event sources and notification decoding.
//!
//! An [`EventSource`] hands the service one [`Delivery`] at a time. Each
//! delivery carries a decoded [`ChangeEvent`] and, for sources that support
//! it, an acknowledgment channel that is settled only after the event has
//! been handled. What a failed acknowledgment means (redelivery,
//! dead-lettering, a failed HTTP response) is up to the source.
//!
//! # Notification format
//!
//! Repository change messages are JSON objects of this shape; everything
//! else in the message (`@context`, `wasAttributedTo`, ...) is ignored:
//!
//! ```json
//! {
//!   "id": "http://fcrepo:8080/fcrepo/rest/grants/30/46/79/7e/3046797e",
//!   "type": ["http://www.w3.org/ns/ldp#Container", "http://oapass.org/ns/pass#Grant"],
//!   "wasGeneratedBy": {
//!     "type": [
//!       "http://fedora.info/definitions/v4/event#ResourceModification",
//!       "http://fedora.info/definitions/v4/event#ResourceCreation"
//!     ]
//!   }
//! }
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::oneshot;

use crate::models::{Action, ChangeEvent};
use crate::router::Outcome;

/// Event type suffixes, in the order they take precedence.
const ACTION_SUFFIXES: [(&str, Action); 3] = [
    ("ResourceDeletion", Action::Deleted),
    ("ResourceCreation", Action::Created),
    ("ResourceModification", Action::Modified),
];

/// A JSON value that may be a single string or a list of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(alias = "@id")]
    id: String,
    #[serde(rename = "type", alias = "@type", default)]
    types: Option<OneOrMany>,
    #[serde(rename = "wasGeneratedBy")]
    generated_by: Option<Activity>,
}

#[derive(Debug, Deserialize)]
struct Activity {
    #[serde(rename = "type", alias = "@type", default)]
    types: Option<OneOrMany>,
}

/// Decode a repository change notification into a [`ChangeEvent`].
///
/// The action comes from the generating activity's types. A message
/// describing both a creation and a modification is a creation; a deletion
/// wins over both.
///
/// # Errors
///
/// Malformed JSON, a missing resource id, or no recognizable activity type.
pub fn decode_notification(text: &str) -> Result<ChangeEvent> {
    let notification: Notification =
        serde_json::from_str(text).context("Malformed change notification")?;

    if notification.id.is_empty() {
        bail!("Change notification has an empty resource id");
    }

    let activity_types = notification
        .generated_by
        .and_then(|a| a.types)
        .map(OneOrMany::into_vec)
        .unwrap_or_default();

    let action = ACTION_SUFFIXES
        .iter()
        .find(|(suffix, _)| activity_types.iter().any(|t| t.ends_with(suffix)))
        .map(|(_, action)| *action)
        .with_context(|| {
            format!(
                "Change notification for {} has no known activity type: {:?}",
                notification.id, activity_types
            )
        })?;

    let resource_types = notification
        .types
        .map(OneOrMany::into_vec)
        .unwrap_or_default();

    Ok(ChangeEvent::new(action, notification.id, resource_types))
}

/// Acknowledgment sent back to a source: the outcome, or the failure text.
pub type Ack = std::result::Result<Outcome, String>;

/// One event handed to the service, with its optional acknowledgment.
#[derive(Debug)]
pub struct Delivery {
    event: ChangeEvent,
    ack: Option<oneshot::Sender<Ack>>,
}

impl Delivery {
    /// A delivery nobody waits on.
    pub fn new(event: ChangeEvent) -> Self {
        Self { event, ack: None }
    }

    /// A delivery whose sender waits for the handling result.
    pub fn with_ack(event: ChangeEvent, ack: oneshot::Sender<Ack>) -> Self {
        Self {
            event,
            ack: Some(ack),
        }
    }

    pub fn event(&self) -> &ChangeEvent {
        &self.event
    }

    /// Report the handling result back to the source.
    pub fn settle(self, result: Ack) {
        if let Some(ack) = self.ack {
            // The sender may have given up waiting (e.g. a client disconnect).
            let _ = ack.send(result);
        }
    }
}

/// A subscription yielding deliveries one at a time.
#[async_trait]
pub trait EventSource: Send {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Wait for the next delivery. `Ok(None)` means the source is exhausted.
    async fn recv(&mut self) -> Result<Option<Delivery>>;

    /// Release the subscription.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Notifications read one JSON document per line, e.g. from a file or stdin.
///
/// There is no redelivery: a failed event is reported by the service and
/// the stream moves on. Blank lines are skipped, and so are lines that do
/// not decode, with a warning.
pub struct JsonLinesSource<R> {
    label: String,
    lines: Lines<R>,
    line_no: usize,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(label: impl Into<String>, reader: R) -> Self {
        Self {
            label: label.into(),
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

#[async_trait]
impl<R> EventSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn describe(&self) -> String {
        format!("json-lines:{}", self.label)
    }

    async fn recv(&mut self) -> Result<Option<Delivery>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .with_context(|| format!("Failed to read {}", self.label))?
        {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            match decode_notification(&line) {
                Ok(event) => return Ok(Some(Delivery::new(event))),
                Err(e) => {
                    tracing::warn!(source = %self.label, line = self.line_no, error = %e, "Skipping undecodable notification");
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const GRANT_URI: &str =
        "http://fcrepo:8080/fcrepo/rest/grants/30/46/79/7e/3046797e-227c-4da0-ae95-e1828561ca5f";

    fn message(id: &str, activity: &[&str]) -> String {
        json!({
            "id": id,
            "type": [
                "http://www.w3.org/ns/ldp#Container",
                "http://oapass.org/ns/pass#Grant",
                "http://fedora.info/definitions/v4/repository#Resource",
                "http://www.w3.org/ns/prov#Entity"
            ],
            "isPartOf": "http://fcrepo:8080/fcrepo/rest",
            "wasGeneratedBy": {
                "type": activity,
                "identifier": "urn:uuid:c87039ad-9b83-43d7-94fa-ddc474b780ef",
                "atTime": "2018-04-10T13:37:49.667Z"
            },
            "wasAttributedTo": [
                { "type": "http://www.w3.org/ns/prov#Person", "name": "admin" }
            ],
            "@context": { "prov": "http://www.w3.org/ns/prov#", "id": "@id", "type": "@type" }
        })
        .to_string()
    }

    #[test]
    fn test_decode_created() {
        let text = message(
            GRANT_URI,
            &[
                "http://fedora.info/definitions/v4/event#ResourceModification",
                "http://fedora.info/definitions/v4/event#ResourceCreation",
                "http://www.w3.org/ns/prov#Activity",
            ],
        );
        let event = decode_notification(&text).unwrap();
        assert_eq!(event.action(), Action::Created);
        assert_eq!(event.resource_uri(), GRANT_URI);
        assert_eq!(event.resource_types().len(), 4);
        assert!(event
            .resource_types()
            .contains("http://oapass.org/ns/pass#Grant"));
    }

    #[test]
    fn test_decode_modified() {
        let text = message(
            GRANT_URI,
            &[
                "http://fedora.info/definitions/v4/event#ResourceModification",
                "http://www.w3.org/ns/prov#Activity",
            ],
        );
        assert_eq!(decode_notification(&text).unwrap().action(), Action::Modified);
    }

    #[test]
    fn test_decode_deleted() {
        let text = message(
            GRANT_URI,
            &[
                "http://fedora.info/definitions/v4/event#ResourceDeletion",
                "http://www.w3.org/ns/prov#Activity",
            ],
        );
        assert_eq!(decode_notification(&text).unwrap().action(), Action::Deleted);
    }

    #[test]
    fn test_decode_single_string_types_and_jsonld_keys() {
        let text = json!({
            "@id": "http://h/fcrepo/x",
            "@type": "http://oapass.org/ns/pass#Journal",
            "wasGeneratedBy": { "@type": "http://fedora.info/definitions/v4/event#ResourceCreation" }
        })
        .to_string();
        let event = decode_notification(&text).unwrap();
        assert_eq!(event.action(), Action::Created);
        assert_eq!(event.resource_uri(), "http://h/fcrepo/x");
        assert!(event
            .resource_types()
            .contains("http://oapass.org/ns/pass#Journal"));
    }

    #[test]
    fn test_decode_rejects_unknown_activity() {
        let text = message(GRANT_URI, &["http://www.w3.org/ns/prov#Activity"]);
        let err = decode_notification(&text).unwrap_err();
        assert!(err.to_string().contains("no known activity type"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_notification("not json").is_err());
        assert!(decode_notification(r#"{"type": []}"#).is_err());
        assert!(decode_notification(r#"{"id": ""}"#).is_err());
    }

    #[tokio::test]
    async fn test_json_lines_source_skips_blank_and_bad_lines() {
        let deleted = message(
            "http://h/fcrepo/a",
            &["http://fedora.info/definitions/v4/event#ResourceDeletion"],
        );
        let created = message(
            "http://h/fcrepo/b",
            &["http://fedora.info/definitions/v4/event#ResourceCreation"],
        );
        let input = format!("{}\n\nnot json\n{}\n", deleted, created);
        let mut source = JsonLinesSource::new("test", input.as_bytes());

        let first = source.recv().await.unwrap().unwrap();
        assert_eq!(first.event().resource_uri(), "http://h/fcrepo/a");
        let second = source.recv().await.unwrap().unwrap();
        assert_eq!(second.event().action(), Action::Created);
        assert!(source.recv().await.unwrap().is_none());
        assert_eq!(source.describe(), "json-lines:test");
    }

    #[tokio::test]
    async fn test_delivery_settles_ack() {
        let (tx, rx) = oneshot::channel();
        let event = ChangeEvent::new(Action::Deleted, "http://h/x", ["t"]);
        Delivery::with_ack(event, tx).settle(Err("boom".to_string()));
        assert_eq!(rx.await.unwrap(), Err("boom".to_string()));
    }
}
