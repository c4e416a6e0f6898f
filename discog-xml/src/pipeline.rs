//! The streaming transform pipeline: drives a `quick_xml` async reader over
//! one decompressed dump file, projecting each top-level entity element to
//! canonical JSON and handing `PUBLISH`-decided records to a bounded channel.
//!
//! State machine per element: scan for the next start tag, build its subtree,
//! project it to JSON, classify it for dedup, then publish or drop. A missing
//! or unparseable id moves an element straight to skipped instead, counted as
//! malformed rather than aborting the file.

use discog_types::{Decision, EntityClass, Record, canonicalize_and_hash};
use log::{info, warn};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tokio::io::{AsyncRead, BufReader};
use tokio::sync::mpsc::Sender;

use crate::error::XmlError;
use crate::project::project;
use crate::tree::read_subtree;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 512;
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1000;

#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineStats {
    pub elements_seen: u64,
    pub skipped_resume: u64,
    pub malformed: u64,
    pub dropped: u64,
    pub published: u64,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub stats: PipelineStats,
    pub final_idx: u64,
    pub final_offset: u64,
}

/// A `PUBLISH`-decided record, tagged with the element index and byte offset
/// it was read at.
///
/// The durable ledger checkpoint must only advance after a record's publish
/// is broker-confirmed, which happens downstream of this crate's bounded
/// channel — so the index/offset travel with the record rather than being
/// checkpointed here at send time.
#[derive(Debug, Clone)]
pub struct EmittedRecord {
    pub record: Record,
    pub idx: u64,
    pub offset: u64,
}

/// Runs the transform for one entity class over `source` until EOF or the
/// output channel closes.
///
/// `resume_from_idx` re-parses but does not re-emit the first `idx` elements:
/// resuming a partially-processed file skips by element index, not byte
/// offset, since byte offsets aren't stable across a differently-buffered
/// re-read. `classify` makes the dedup decision
/// without this crate depending on `discog-ledger` directly. `progress` is
/// invoked every `progress_interval` elements with `(byte_offset, idx)` —
/// informational only (e.g. driving the health endpoint); it is not the
/// durable ledger checkpoint, which the caller derives from confirmed
/// `EmittedRecord`s instead.
pub async fn run<R, Classify, Progress>(
    class: EntityClass,
    source: R,
    resume_from_idx: u64,
    progress_interval: u64,
    sender: Sender<EmittedRecord>,
    mut classify: Classify,
    mut progress: Progress,
) -> Result<PipelineOutcome, XmlError>
where
    R: AsyncRead + Unpin + Send,
    Classify: FnMut(EntityClass, i64, &discog_types::ContentHash) -> Decision,
    Progress: FnMut(u64, u64),
{
    let mut reader = Reader::from_reader(BufReader::new(source));
    reader.config_mut().trim_text(true);

    let root_tag = class.xml_element().to_string();
    let mut buf = Vec::new();
    let mut stats = PipelineStats::default();
    let mut idx: u64 = 0;

    loop {
        buf.clear();
        match reader.read_event_into_async(&mut buf).await? {
            Event::Start(start) => {
                let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                if tag != root_tag {
                    continue;
                }

                let mut attributes = Vec::new();
                for attr in start.attributes() {
                    let attr = attr.map_err(XmlError::from)?;
                    attributes.push((
                        String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                        attr.unescape_value()?.into_owned(),
                    ));
                }

                let element = read_subtree(&mut reader, &mut buf, tag, attributes).await?;
                stats.elements_seen += 1;
                idx += 1;

                if idx <= resume_from_idx {
                    stats.skipped_resume += 1;
                    continue;
                }

                match project(class, &element) {
                    Ok((entity_id, value)) => {
                        let (canonical_json, content_hash) = canonicalize_and_hash(&value)?;
                        match classify(class, entity_id, &content_hash) {
                            Decision::Publish => {
                                stats.published += 1;
                                let record = Record { entity_class: class, entity_id, canonical_json, content_hash };
                                let emitted =
                                    EmittedRecord { record, idx, offset: reader.buffer_position() as u64 };
                                if sender.send(emitted).await.is_err() {
                                    warn!("event=pipeline_channel_closed class={class}. Stopping early.");
                                    break;
                                }
                            }
                            Decision::Drop => {
                                stats.dropped += 1;
                            }
                        }
                    }
                    Err(err) => {
                        stats.malformed += 1;
                        warn!("event=malformed_record class={class} idx={idx} error={err}. Skipping.");
                    }
                }

                if idx % progress_interval == 0 {
                    progress(reader.buffer_position() as u64, idx);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    info!(
        "event=pipeline_file_done class={class} seen={} published={} dropped={} malformed={} skipped_resume={}",
        stats.elements_seen, stats.published, stats.dropped, stats.malformed, stats.skipped_resume
    );

    Ok(PipelineOutcome { stats, final_idx: idx, final_offset: reader.buffer_position() as u64 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use discog_types::ContentHash;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::mpsc;

    const SAMPLE: &str = r#"<artists>
        <artist id="1"><name>First</name></artist>
        <artist id="2"><name>Second</name></artist>
        <artist id="3"><name>Third</name></artist>
    </artists>"#;

    #[tokio::test]
    async fn publishes_all_when_classify_always_publishes() {
        let (tx, mut rx) = mpsc::channel(8);
        let outcome = run(
            EntityClass::Artist,
            SAMPLE.as_bytes(),
            0,
            DEFAULT_CHECKPOINT_INTERVAL,
            tx,
            |_, _, _: &ContentHash| Decision::Publish,
            |_, _| {},
        )
        .await
        .unwrap();

        assert_eq!(outcome.stats.published, 3);
        assert_eq!(outcome.stats.elements_seen, 3);

        let mut received = Vec::new();
        while let Some(emitted) = rx.recv().await {
            received.push(emitted.record.entity_id);
        }
        assert_eq!(received, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn resume_from_idx_skips_already_processed_elements() {
        let (tx, mut rx) = mpsc::channel(8);
        let outcome = run(
            EntityClass::Artist,
            SAMPLE.as_bytes(),
            1,
            DEFAULT_CHECKPOINT_INTERVAL,
            tx,
            |_, _, _: &ContentHash| Decision::Publish,
            |_, _| {},
        )
        .await
        .unwrap();

        assert_eq!(outcome.stats.skipped_resume, 1);
        assert_eq!(outcome.stats.published, 2);

        let mut received = Vec::new();
        while let Some(emitted) = rx.recv().await {
            received.push(emitted.record.entity_id);
        }
        assert_eq!(received, vec![2, 3]);
    }

    #[tokio::test]
    async fn dropped_records_are_not_sent() {
        let (tx, mut rx) = mpsc::channel(8);
        let outcome = run(
            EntityClass::Artist,
            SAMPLE.as_bytes(),
            0,
            DEFAULT_CHECKPOINT_INTERVAL,
            tx,
            |_, entity_id, _: &ContentHash| if entity_id == 2 { Decision::Drop } else { Decision::Publish },
            |_, _| {},
        )
        .await
        .unwrap();

        assert_eq!(outcome.stats.published, 2);
        assert_eq!(outcome.stats.dropped, 1);
        drop(outcome);

        let mut received = Vec::new();
        while let Some(emitted) = rx.recv().await {
            received.push(emitted.record.entity_id);
        }
        assert_eq!(received, vec![1, 3]);
    }

    #[tokio::test]
    async fn malformed_elements_are_counted_and_skipped() {
        let xml = r#"<artists>
            <artist id="1"><name>Good</name></artist>
            <artist><name>No id</name></artist>
            <artist id="3"><name>Also good</name></artist>
        </artists>"#;

        let (tx, mut rx) = mpsc::channel(8);
        let outcome = run(
            EntityClass::Artist,
            xml.as_bytes(),
            0,
            DEFAULT_CHECKPOINT_INTERVAL,
            tx,
            |_, _, _: &ContentHash| Decision::Publish,
            |_, _| {},
        )
        .await
        .unwrap();

        assert_eq!(outcome.stats.malformed, 1);
        assert_eq!(outcome.stats.published, 2);

        let mut received = Vec::new();
        while let Some(emitted) = rx.recv().await {
            received.push(emitted.record.entity_id);
        }
        assert_eq!(received, vec![1, 3]);
    }

    #[tokio::test]
    async fn checkpoint_is_invoked_at_the_configured_interval() {
        let calls = std::sync::Arc::new(AtomicU64::new(0));
        let calls_in_closure = calls.clone();
        let (tx, _rx) = mpsc::channel(8);
        run(
            EntityClass::Artist,
            SAMPLE.as_bytes(),
            0,
            1,
            tx,
            |_, _, _: &ContentHash| Decision::Publish,
            move |_offset, _idx| {
                calls_in_closure.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
