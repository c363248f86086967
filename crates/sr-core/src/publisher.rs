use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio::sync::watch;

use crate::job::{JobId, JobSnapshot};

/// Fans job snapshots out to observers.
///
/// Each live job owns a watch channel: publishing overwrites the latest
/// value and never waits on receivers, so a slow observer only misses
/// intermediate snapshots. The channel is dropped after the terminal
/// snapshot, which ends every subscription once it has been read.
#[derive(Default)]
pub struct ProgressPublisher {
    channels: Mutex<HashMap<JobId, watch::Sender<JobSnapshot>>>,
}

impl ProgressPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<JobId, watch::Sender<JobSnapshot>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open(&self, snapshot: JobSnapshot) {
        let (tx, _rx) = watch::channel(snapshot.clone());
        self.channels().insert(snapshot.id, tx);
    }

    pub fn publish(&self, snapshot: JobSnapshot) {
        let mut channels = self.channels();
        let id = snapshot.id;
        let terminal = snapshot.status.is_terminal();
        match channels.get(&id) {
            Some(tx) => {
                tx.send_replace(snapshot);
            }
            None => return,
        }
        if terminal {
            channels.remove(&id);
        }
    }

    /// `None` once the job's stream has closed (or never existed).
    pub fn subscribe(&self, id: JobId) -> Option<Subscription> {
        self.channels().get(&id).map(|tx| Subscription::live(tx.subscribe()))
    }

    pub fn live_jobs(&self) -> usize {
        self.channels().len()
    }
}

pub struct Subscription {
    rx: Option<watch::Receiver<JobSnapshot>>,
    pending: Option<JobSnapshot>,
}

impl Subscription {
    fn live(mut rx: watch::Receiver<JobSnapshot>) -> Self {
        let current = rx.borrow_and_update().clone();
        Self {
            rx: Some(rx),
            pending: Some(current),
        }
    }

    /// A subscription that yields one final snapshot and ends.
    pub fn finished(snapshot: JobSnapshot) -> Self {
        Self {
            rx: None,
            pending: Some(snapshot),
        }
    }

    /// Latest snapshot first, then every observed change; `None` after the
    /// terminal snapshot has been delivered.
    pub async fn next(&mut self) -> Option<JobSnapshot> {
        let snapshot = match self.pending.take() {
            Some(snapshot) => snapshot,
            None => {
                let rx = self.rx.as_mut()?;
                if rx.changed().await.is_err() {
                    self.rx = None;
                    return None;
                }
                rx.borrow_and_update().clone()
            }
        };
        if snapshot.status.is_terminal() {
            self.rx = None;
        }
        Some(snapshot)
    }

    pub fn into_stream(self) -> impl Stream<Item = JobSnapshot> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|snapshot| (snapshot, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    fn snapshot(id: JobId, status: JobStatus, progress: f32) -> JobSnapshot {
        let mut s = JobSnapshot::queued(id);
        s.status = status;
        s.progress = progress;
        s
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_latest_first() {
        let publisher = ProgressPublisher::new();
        let id = JobId::new();
        publisher.open(snapshot(id, JobStatus::Queued, 0.0));
        publisher.publish(snapshot(id, JobStatus::Processing, 10.0));
        publisher.publish(snapshot(id, JobStatus::Processing, 20.0));

        let mut sub = publisher.subscribe(id).unwrap();
        assert_eq!(sub.next().await.unwrap().progress, 20.0);

        publisher.publish(snapshot(id, JobStatus::Processing, 30.0));
        assert_eq!(sub.next().await.unwrap().progress, 30.0);
    }

    #[tokio::test]
    async fn test_terminal_closes_stream() {
        let publisher = ProgressPublisher::new();
        let id = JobId::new();
        publisher.open(snapshot(id, JobStatus::Queued, 0.0));
        let mut sub = publisher.subscribe(id).unwrap();
        assert_eq!(sub.next().await.unwrap().status, JobStatus::Queued);

        publisher.publish(snapshot(id, JobStatus::Completed, 100.0));
        let last = sub.next().await.unwrap();
        assert_eq!(last.status, JobStatus::Completed);
        assert!(sub.next().await.is_none());

        assert!(publisher.subscribe(id).is_none());
        assert_eq!(publisher.live_jobs(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_observers_does_not_block() {
        let publisher = ProgressPublisher::new();
        let id = JobId::new();
        publisher.open(snapshot(id, JobStatus::Queued, 0.0));
        for i in 0..1000 {
            publisher.publish(snapshot(id, JobStatus::Processing, i as f32 / 20.0));
        }
        let mut sub = publisher.subscribe(id).unwrap();
        assert_eq!(sub.next().await.unwrap().progress, 999.0 / 20.0);
    }

    #[tokio::test]
    async fn test_finished_subscription() {
        let id = JobId::new();
        let mut sub = Subscription::finished(snapshot(id, JobStatus::Failed, 35.0));
        assert_eq!(sub.next().await.unwrap().status, JobStatus::Failed);
        assert!(sub.next().await.is_none());
    }
}
