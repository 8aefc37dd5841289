//! Latest estimator output shared between the estimator thread and the
//! odometry caller.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::transform::Transform;
use crate::types::{Landmarks, MapPoint};

/// Holds the most recent pose and landmark set published by the estimator.
///
/// Pose and landmarks are guarded independently; a reader may observe a pose
/// and a landmark set from different estimator updates. Writers only hold a
/// lock for the duration of a copy and never wait for readers.
pub struct StateHandoff {
    pose: Mutex<Transform>,
    landmarks: Mutex<Landmarks>,
    fresh_tx: Sender<()>,
    fresh_rx: Receiver<()>,
}

impl Default for StateHandoff {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHandoff {
    pub fn new() -> Self {
        // Capacity 1: pending notifications collapse into a single release.
        let (fresh_tx, fresh_rx) = crossbeam_channel::bounded(1);
        Self {
            pose: Mutex::new(Transform::null()),
            landmarks: Mutex::new(Landmarks::new()),
            fresh_tx,
            fresh_rx,
        }
    }

    /// Replace the stored pose (estimator world frame, body `T_WS`).
    pub fn publish_pose(&self, pose: Transform) {
        *self.pose.lock().unwrap_or_else(PoisonError::into_inner) = pose;
    }

    /// Copy of the last published pose, null if none yet.
    pub fn last_pose(&self) -> Transform {
        *self.pose.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the stored landmark set.
    ///
    /// Returns `true` when the update was fresh, i.e. it fills a previously
    /// empty set, in which case one waiting reader is released. Updates over a
    /// non-empty set are refreshes and raise no notification.
    pub fn publish_landmarks(&self, points: &[MapPoint]) -> bool {
        let fresh = {
            let mut landmarks = self.landmarks.lock().unwrap_or_else(PoisonError::into_inner);
            let fresh = landmarks.is_empty() && !points.is_empty();
            *landmarks = points
                .iter()
                .map(|mp| (mp.id, mp.point))
                .collect();
            fresh
        };
        if fresh {
            // Full means a release is already pending.
            let _ = self.fresh_tx.try_send(());
        }
        fresh
    }

    /// Copy of the last published landmark set.
    pub fn last_landmarks(&self) -> Landmarks {
        self.landmarks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Block until a fresh landmark update is signalled or `timeout` elapses.
    pub fn wait_for_landmarks(&self, timeout: Duration) -> bool {
        self.fresh_rx.recv_timeout(timeout).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use std::sync::Arc;

    fn points(ids: &[u64]) -> Vec<MapPoint> {
        ids.iter()
            .map(|&id| MapPoint {
                id,
                point: Point3::new(id as f64, 0.0, 1.0),
                quality: 0.1,
            })
            .collect()
    }

    #[test]
    fn test_pose_starts_null() {
        let handoff = StateHandoff::new();
        assert!(handoff.last_pose().is_null());
        handoff.publish_pose(Transform::from_translation(1.0, 0.0, 0.0));
        assert_eq!(handoff.last_pose().x(), 1.0);
    }

    #[test]
    fn test_fresh_only_from_empty() {
        let handoff = StateHandoff::new();
        assert!(handoff.publish_landmarks(&points(&[1, 2])));
        assert!(!handoff.publish_landmarks(&points(&[3])));
        assert_eq!(handoff.last_landmarks().keys().copied().collect::<Vec<_>>(), vec![3]);

        assert!(handoff.wait_for_landmarks(Duration::from_millis(10)));
        // The refresh did not queue a second release.
        assert!(!handoff.wait_for_landmarks(Duration::from_millis(10)));
    }

    #[test]
    fn test_empty_update_rearms_notification() {
        let handoff = StateHandoff::new();
        assert!(handoff.publish_landmarks(&points(&[1])));
        assert!(!handoff.publish_landmarks(&[]));
        assert!(handoff.last_landmarks().is_empty());
        assert!(handoff.publish_landmarks(&points(&[2])));
    }

    #[test]
    fn test_empty_over_empty_releases_nobody() {
        let handoff = StateHandoff::new();
        assert!(!handoff.publish_landmarks(&[]));
        assert!(!handoff.publish_landmarks(&[]));
        assert!(!handoff.wait_for_landmarks(Duration::from_millis(10)));
    }

    #[test]
    fn test_pending_releases_collapse() {
        let handoff = StateHandoff::new();
        assert!(!handoff.publish_landmarks(&[]));
        assert!(handoff.publish_landmarks(&points(&[5])));
        handoff.publish_landmarks(&[]);
        assert!(handoff.publish_landmarks(&points(&[6])));
        assert!(handoff.wait_for_landmarks(Duration::from_millis(10)));
        assert!(!handoff.wait_for_landmarks(Duration::from_millis(10)));
    }

    #[test]
    fn test_waiter_released_from_other_thread() {
        let handoff = Arc::new(StateHandoff::new());
        let writer = handoff.clone();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.publish_pose(Transform::identity());
            writer.publish_landmarks(&points(&[9]))
        });
        assert!(handoff.wait_for_landmarks(Duration::from_secs(5)));
        assert!(thread.join().unwrap());
        assert!(handoff.last_landmarks().contains_key(&9));
    }
}
