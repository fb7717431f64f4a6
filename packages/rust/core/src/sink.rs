//! The `sink-worker` participant: appends analysis outputs to JSON-lines
//! logs for downstream consumers (dashboards, human reviewers).

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use eppn_shared::{EppnError, Message, MessageKind, ParticipantId, Result};

use crate::heartbeat::{HeartbeatReport, HeartbeatSource};
use crate::participant::Participant;

pub const SUMMARY_LOG: &str = "summaries.jsonl";
pub const ETHICS_LOG: &str = "ethics.jsonl";

pub struct Sink {
    id: ParticipantId,
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl Sink {
    pub fn new(id: ParticipantId, dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn summary_log(&self) -> PathBuf {
        self.dir.join(SUMMARY_LOG)
    }

    pub fn ethics_log(&self) -> PathBuf {
        self.dir.join(ETHICS_LOG)
    }

    /// Number of summaries and ethics reports written so far, counted by
    /// streaming the logs line by line.
    pub async fn counts(&self) -> Result<(u64, u64)> {
        let _guard = self.write_lock.lock().await;
        Ok((
            count_lines(&self.summary_log())?,
            count_lines(&self.ethics_log())?,
        ))
    }

    async fn append<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| EppnError::persistence(path, format!("serialize: {e}")))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        std::fs::create_dir_all(&self.dir).map_err(|e| EppnError::io(&self.dir, e))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EppnError::io(path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| EppnError::io(path, e))?;
        Ok(())
    }
}

fn count_lines(path: &Path) -> Result<u64> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(EppnError::io(path, e)),
    };
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        line.map_err(|e| EppnError::io(path, e))?;
        count += 1;
    }
    Ok(count)
}

#[async_trait]
impl HeartbeatSource for Sink {
    async fn heartbeat(&self) -> Result<HeartbeatReport> {
        let (summaries, ethics) = self.counts().await?;
        Ok(HeartbeatReport::new(self.id.clone())
            .with("summaries", summaries)
            .with("ethics_reports", ethics))
    }
}

#[async_trait]
impl Participant for Sink {
    fn id(&self) -> &ParticipantId {
        &self.id
    }

    fn accepts(&self, kind: MessageKind) -> bool {
        matches!(kind, MessageKind::SummaryReady | MessageKind::EthicsReport)
    }

    async fn handle(&self, message: Message) -> Result<()> {
        match &message {
            Message::SummaryReady(m) => {
                let preview: Vec<&String> = m.key_points.iter().take(3).collect();
                info!(doc_id = %m.doc_id, key_points = ?preview, "summary received");
                self.append(&self.summary_log(), m).await
            }
            Message::EthicsReport(m) => {
                info!(
                    doc_id = %m.doc_id,
                    summary = ?m.report.get("summary"),
                    risks = m.risks.len(),
                    "ethics report received"
                );
                self.append(&self.ethics_log(), m).await
            }
            other => Err(EppnError::Unsupported {
                participant: self.id.to_string(),
                kind: other.kind().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eppn_shared::{EthicsReport, Metadata, SummaryReady};
    use serde_json::json;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("eppn-sink-test-{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn appends_outputs_and_counts_them() {
        let dir = temp_dir();
        let sink = Sink::new(ParticipantId::new("sink-worker"), &dir);
        assert_eq!(sink.counts().await.expect("counts"), (0, 0));

        let mut metadata = Metadata::new();
        metadata.insert("lang".into(), json!("en"));
        for doc in ["d1", "d2"] {
            sink.handle(
                SummaryReady {
                    doc_id: doc.into(),
                    summary: "s".into(),
                    key_points: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                    metadata: metadata.clone(),
                }
                .into(),
            )
            .await
            .expect("summary");
        }
        sink.handle(
            EthicsReport {
                doc_id: "d1".into(),
                report: Metadata::new(),
                risks: vec![],
                recommendations: vec![],
                metadata: Metadata::new(),
            }
            .into(),
        )
        .await
        .expect("ethics");

        assert_eq!(sink.counts().await.expect("counts"), (2, 1));

        let content = std::fs::read_to_string(sink.summary_log()).expect("read");
        let first: SummaryReady =
            serde_json::from_str(content.lines().next().expect("line")).expect("parse");
        assert_eq!(first.doc_id, "d1");
        assert_eq!(first.metadata.get("lang"), Some(&json!("en")));

        let report = sink.heartbeat().await.expect("heartbeat");
        assert_eq!(report.get("summaries"), Some(2));
        assert_eq!(report.get("ethics_reports"), Some(1));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn rejects_unrouted_kinds() {
        let sink = Sink::new(ParticipantId::new("sink-worker"), temp_dir());
        assert!(!sink.accepts(MessageKind::ParsedText));
        assert!(sink.accepts(MessageKind::EthicsReport));
    }
}
