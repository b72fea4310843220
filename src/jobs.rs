use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use uuid::Uuid;

/// How long a finished job's backlog stays around for late subscribers.
pub const BACKLOG_RETENTION: Duration = Duration::from_secs(120);

const CHANNEL_CAPACITY: usize = 64;

/// A message on a job's channel: one materialized ledger entry (serialized
/// public view), or the terminal marker.
#[derive(Debug, Clone, PartialEq)]
pub enum JobMessage {
    Entry(String),
    Done,
}

struct JobState {
    sender: broadcast::Sender<JobMessage>,
    backlog: Vec<JobMessage>,
    done_at: Option<Instant>,
    opened_at: Instant,
    /// False until the first publish. Attach can open state for an id nobody
    /// ever publishes to; such entries must not live forever.
    published: bool,
}

impl JobState {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            backlog: Vec::new(),
            done_at: None,
            opened_at: Instant::now(),
            published: false,
        }
    }
}

/// Per-job publish/subscribe channel plus an ordered backlog, so subscribers
/// attaching after messages were published still see them. The orchestrator
/// and the stream side only ever talk through this.
#[derive(Clone)]
pub struct JobBus {
    inner: Arc<Mutex<HashMap<Uuid, JobState>>>,
    retention: Duration,
}

impl Default for JobBus {
    fn default() -> Self {
        Self::with_retention(BACKLOG_RETENTION)
    }
}

impl JobBus {
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            retention,
        }
    }

    /// Appends to the backlog and fans out to live subscribers. A `Done`
    /// marker starts the retention clock.
    pub fn publish(&self, job_id: Uuid, message: JobMessage) {
        let mut jobs = self.inner.lock().expect("job bus lock");
        let job = jobs.entry(job_id).or_insert_with(JobState::new);
        job.published = true;
        job.backlog.push(message.clone());
        if matches!(message, JobMessage::Done) {
            job.done_at = Some(Instant::now());
        }
        // No receivers yet is fine, the backlog covers them.
        let _ = job.sender.send(message);
    }

    pub fn finish(&self, job_id: Uuid) {
        self.publish(job_id, JobMessage::Done);
    }

    /// Subscribes and drains the backlog in one step, under one lock, so no
    /// message can land between the two. Backlog entries are delivered to at
    /// most one subscriber.
    pub fn attach(&self, job_id: Uuid) -> (Vec<JobMessage>, broadcast::Receiver<JobMessage>) {
        self.sweep();
        let mut jobs = self.inner.lock().expect("job bus lock");
        let job = jobs.entry(job_id).or_insert_with(JobState::new);
        let receiver = job.sender.subscribe();
        let backlog = std::mem::take(&mut job.backlog);
        (backlog, receiver)
    }

    /// Drops finished jobs past the retention window, and jobs that were
    /// only ever opened by a subscriber (unknown or already-expired ids).
    /// Removal drops the sender, which closes any attached streams.
    pub fn sweep(&self) {
        let retention = self.retention;
        let mut jobs = self.inner.lock().expect("job bus lock");
        jobs.retain(|_, job| match job.done_at {
            Some(done_at) => done_at.elapsed() < retention,
            None => job.published || job.opened_at.elapsed() < retention,
        });
    }

    #[cfg(test)]
    fn job_count(&self) -> usize {
        self.inner.lock().expect("job bus lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_delivered_once_in_order() {
        let bus = JobBus::default();
        let job_id = Uuid::new_v4();
        bus.publish(job_id, JobMessage::Entry("a".into()));
        bus.publish(job_id, JobMessage::Entry("b".into()));
        bus.publish(job_id, JobMessage::Entry("c".into()));

        let (backlog, _rx) = bus.attach(job_id);
        assert_eq!(
            backlog,
            vec![
                JobMessage::Entry("a".into()),
                JobMessage::Entry("b".into()),
                JobMessage::Entry("c".into()),
            ]
        );

        let (second, _rx2) = bus.attach(job_id);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn live_messages_reach_attached_subscriber() {
        let bus = JobBus::default();
        let job_id = Uuid::new_v4();
        let (backlog, mut rx) = bus.attach(job_id);
        assert!(backlog.is_empty());

        bus.publish(job_id, JobMessage::Entry("live".into()));
        bus.finish(job_id);

        assert_eq!(rx.recv().await.unwrap(), JobMessage::Entry("live".into()));
        assert_eq!(rx.recv().await.unwrap(), JobMessage::Done);
    }

    #[test]
    fn done_marker_lands_in_backlog_for_late_subscribers() {
        let bus = JobBus::default();
        let job_id = Uuid::new_v4();
        bus.publish(job_id, JobMessage::Entry("a".into()));
        bus.finish(job_id);

        let (backlog, _rx) = bus.attach(job_id);
        assert_eq!(backlog.last(), Some(&JobMessage::Done));
    }

    #[test]
    fn sweep_reclaims_subscriber_opened_jobs() {
        let bus = JobBus::with_retention(Duration::ZERO);
        for _ in 0..10 {
            let _ = bus.attach(Uuid::new_v4());
        }
        bus.sweep();
        assert_eq!(bus.job_count(), 0);

        // A job with a publisher is never reclaimed before it finishes.
        let running = Uuid::new_v4();
        bus.publish(running, JobMessage::Entry("a".into()));
        let _ = bus.attach(running);
        bus.sweep();
        assert_eq!(bus.job_count(), 1);
    }

    #[test]
    fn sweep_expires_finished_jobs_only() {
        let bus = JobBus::with_retention(Duration::ZERO);
        let finished = Uuid::new_v4();
        let running = Uuid::new_v4();
        bus.publish(finished, JobMessage::Entry("a".into()));
        bus.finish(finished);
        bus.publish(running, JobMessage::Entry("b".into()));

        bus.sweep();
        assert_eq!(bus.job_count(), 1);

        let (backlog, _rx) = bus.attach(running);
        assert_eq!(backlog, vec![JobMessage::Entry("b".into())]);
    }
}
