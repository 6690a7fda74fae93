//! Drift tracking and play/pause reconciliation shared by both player backends.
//! Host-driven: the backend feeds observed samples in and broadcasts what comes back out.

/// Position jumps up to this many seconds are ordinary progress or polling jitter.
pub const DRIFT_THRESHOLD_SECS: u64 = 1;

/// Samples a pending local seek may stay unconfirmed before tracking resumes.
pub const VOLATILE_SAMPLE_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingSeek {
    target: u64,
    samples: u32,
}

/// Per-playback tracker. Created when playback begins, discarded on disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackState {
    previous_position: u64,
    is_playing: bool,
    pending_seek: Option<PendingSeek>,
}

impl PlaybackState {
    pub fn new(is_playing: bool) -> Self {
        Self {
            previous_position: 0,
            is_playing,
            pending_seek: None,
        }
    }

    pub fn previous_position(&self) -> u64 {
        self.previous_position
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_position_volatile(&self) -> bool {
        self.pending_seek.is_some()
    }

    /// Forget the last position; the next sample is measured from zero.
    pub fn reset_position(&mut self) {
        self.previous_position = 0;
        self.pending_seek = None;
    }

    /// Feed one sampled position. Returns `Some(t)` when the jump looks like a seek
    /// made on the local player, which the caller broadcasts as `seek t`.
    pub fn observe_position(&mut self, position: u64) -> Option<u64> {
        if let Some(pending) = &mut self.pending_seek {
            pending.samples += 1;
            if position.abs_diff(pending.target) <= DRIFT_THRESHOLD_SECS
                || pending.samples >= VOLATILE_SAMPLE_LIMIT
            {
                self.pending_seek = None;
                self.previous_position = position;
            }
            return None;
        }

        let delta = position.abs_diff(self.previous_position);
        self.previous_position = position;
        if delta <= DRIFT_THRESHOLD_SECS {
            None
        } else {
            Some(position)
        }
    }

    /// A peer asked for a seek: suppress drift correction until the player reports `target`.
    pub fn begin_local_seek(&mut self, target: u64) {
        self.previous_position = target;
        self.pending_seek = Some(PendingSeek { target, samples: 0 });
    }

    /// Feed the player's observed play/paused state. Returns true only on a transition,
    /// in which case the tracked state has been flipped and the caller broadcasts it.
    pub fn observe_playing(&mut self, playing: bool) -> bool {
        if playing == self.is_playing {
            return false;
        }
        self.is_playing = playing;
        true
    }

    /// A peer toggled play/pause; track it locally so the echo is not re-broadcast.
    pub fn toggle_local(&mut self) {
        self.is_playing = !self.is_playing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcasts(state: &mut PlaybackState, samples: &[u64]) -> Vec<u64> {
        samples
            .iter()
            .filter_map(|&t| state.observe_position(t))
            .collect()
    }

    #[test]
    fn steady_progress_never_broadcasts() {
        let mut state = PlaybackState::new(true);
        state.observe_position(10);
        assert!(broadcasts(&mut state, &[10, 11, 12, 13]).is_empty());
        assert_eq!(state.previous_position(), 13);
    }

    #[test]
    fn jump_broadcasts_once() {
        let mut state = PlaybackState::new(true);
        state.observe_position(9);
        assert_eq!(broadcasts(&mut state, &[10, 40, 41, 42]), vec![40]);
    }

    #[test]
    fn backward_jump_uses_absolute_delta() {
        let mut state = PlaybackState::new(true);
        state.observe_position(100);
        assert_eq!(broadcasts(&mut state, &[101, 99, 20]), vec![20]);
    }

    #[test]
    fn first_sample_far_from_zero_broadcasts() {
        let mut state = PlaybackState::new(true);
        assert_eq!(state.observe_position(30), Some(30));
    }

    #[test]
    fn peer_seek_suppresses_until_reached() {
        let mut state = PlaybackState::new(true);
        state.observe_position(1);
        state.begin_local_seek(120);
        assert!(state.is_position_volatile());
        assert!(broadcasts(&mut state, &[2, 3]).is_empty());
        assert!(state.is_position_volatile());
        assert!(broadcasts(&mut state, &[119]).is_empty());
        assert!(!state.is_position_volatile());
        assert!(broadcasts(&mut state, &[120, 121]).is_empty());
    }

    #[test]
    fn unconfirmed_seek_expires_without_broadcast() {
        let mut state = PlaybackState::new(true);
        state.begin_local_seek(5000);
        let stuck = [7u64; VOLATILE_SAMPLE_LIMIT as usize];
        assert!(broadcasts(&mut state, &stuck).is_empty());
        assert!(!state.is_position_volatile());
        assert_eq!(state.previous_position(), 7);
        assert!(broadcasts(&mut state, &[8]).is_empty());
    }

    #[test]
    fn play_state_broadcasts_only_on_transition() {
        let mut state = PlaybackState::new(true);
        assert!(!state.observe_playing(true));
        assert!(!state.observe_playing(true));
        assert!(state.observe_playing(false));
        assert!(!state.observe_playing(false));
        assert!(state.observe_playing(true));
    }

    #[test]
    fn local_toggle_swallows_echo() {
        let mut state = PlaybackState::new(true);
        state.toggle_local();
        assert!(!state.observe_playing(false));
    }
}
