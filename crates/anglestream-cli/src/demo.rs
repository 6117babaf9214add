//! Demo producer: a small looping "dance" fed into the server from a plain
//! OS thread.

use std::f64::consts::PI;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anglestream_server::{ShutdownSignal, StateStore};
use anglestream_types::Angles;
use tracing::{info, warn};

/// Primary tempo of the dance, in Hz.
const TEMPO_HZ: f64 = 0.6;

/// Pose for `key` at `elapsed` seconds into the dance.
///
/// The seven demo joints get hand-tuned motions; any other key gets a gentle
/// sweep whose phase depends on its position so configured skeletons still
/// move.
pub fn dance_pose(key: &str, position: usize, elapsed: f64) -> Angles {
    let beat = 2.0 * PI * TEMPO_HZ * elapsed;
    let arm_swing = 35.0 * beat.sin();
    let arm_raise = 25.0 * (beat * 0.5).sin();
    let leg_kick = 20.0 * (beat + PI / 2.0).sin();
    let knee_bounce = 10.0 * (beat * 2.0).sin();

    match key {
        "right_shoulder" => [arm_swing, arm_raise, 0.0],
        "left_shoulder" => [-arm_swing, -arm_raise, 0.0],
        "spine1" => [0.0, 15.0 * (beat * 1.2).sin(), 0.0],
        "left_hip" => [leg_kick, 0.0, 0.0],
        "right_hip" => [-leg_kick, 0.0, 0.0],
        "left_knee" => [knee_bounce, 0.0, 0.0],
        "right_knee" => [-knee_bounce, 0.0, 0.0],
        _ => [15.0 * (beat + position as f64 * 0.7).sin(), 0.0, 0.0],
    }
}

/// Spawn the producer thread. It pushes a full pose every `period` until
/// `shutdown` is triggered.
pub fn spawn_dance(
    store: Arc<StateStore>,
    shutdown: ShutdownSignal,
    period: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("dance-producer".to_string())
        .spawn(move || {
            info!(period = ?period, "demo producer started");
            let start = Instant::now();
            let mut updates: u64 = 0;

            while !shutdown.is_triggered() {
                let elapsed = start.elapsed().as_secs_f64();
                let pose = store
                    .keys()
                    .iter()
                    .enumerate()
                    .map(|(i, key)| (key.as_str(), dance_pose(key, i, elapsed)));

                match store.update(pose) {
                    Ok(()) => updates += 1,
                    Err(e) => warn!(error = %e, "demo pose rejected"),
                }
                thread::sleep(period);
            }

            info!(updates, "demo producer stopped");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEMO_JOINTS;

    #[test]
    fn dance_starts_from_rest_for_arms() {
        assert_eq!(dance_pose("right_shoulder", 0, 0.0), [0.0, 0.0, 0.0]);
        assert_eq!(dance_pose("spine1", 2, 0.0), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn left_and_right_mirror_each_other() {
        for t in [0.1, 0.37, 1.9] {
            let r = dance_pose("right_hip", 3, t);
            let l = dance_pose("left_hip", 4, t);
            assert!((r[0] + l[0]).abs() < 1e-12);
        }
    }

    #[test]
    fn poses_stay_within_joint_range() {
        for step in 0..200 {
            let t = step as f64 * 0.05;
            for (i, key) in DEMO_JOINTS.iter().enumerate() {
                for c in dance_pose(key, i, t) {
                    assert!(c.abs() <= 35.0 + 1e-9, "{key} out of range at t={t}");
                }
            }
        }
    }

    #[test]
    fn producer_fills_store_and_stops() {
        let store = Arc::new(StateStore::new(DEMO_JOINTS.iter().copied().chain(["tail"])).unwrap());
        let shutdown = ShutdownSignal::new();
        let handle = spawn_dance(Arc::clone(&store), shutdown.clone(), Duration::from_millis(5)).unwrap();

        thread::sleep(Duration::from_millis(100));
        shutdown.trigger();
        handle.join().unwrap();

        // After ~0.1 s the knees have moved off zero.
        let knee = store.read_snapshot().get("left_knee").unwrap();
        assert!(knee[0].abs() > 0.0);
    }
}
