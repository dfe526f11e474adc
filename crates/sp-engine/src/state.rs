//! Playback state manager
//!
//! Owns the current [`PlaybackState`]. Transitions are checked against the
//! table in `sp_core` and committed under a mutex; the `StateChanged` event
//! is published before the lock is released, so subscribers see changes in
//! commit order. A watch channel lets the playback loop sleep while paused.

use sp_core::{Context, EngineEvent, InvalidTransition, PlaybackState};
use sp_event_bus::SharedEventBus;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct PlaybackStateManager {
    state: Mutex<PlaybackState>,
    watch_tx: watch::Sender<PlaybackState>,
    bus: SharedEventBus,
}

impl PlaybackStateManager {
    pub fn new(bus: SharedEventBus) -> Self {
        let (watch_tx, _) = watch::channel(PlaybackState::Idle);
        Self {
            state: Mutex::new(PlaybackState::Idle),
            watch_tx,
            bus,
        }
    }

    pub fn current(&self) -> PlaybackState {
        *self.state.lock().unwrap()
    }

    /// Receiver that observes every committed state
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.watch_tx.subscribe()
    }

    /// Move to `to`, returning the previous state
    pub fn transition(
        &self,
        to: PlaybackState,
        context: &Context,
    ) -> Result<PlaybackState, InvalidTransition> {
        let mut state = self.state.lock().unwrap();
        let old = *state;
        *state = old.try_transition(to)?;
        self.commit(old, to, context);
        Ok(old)
    }

    /// Move from `expected` to `to`; does nothing when the state is not `expected`
    pub fn transition_if(
        &self,
        expected: PlaybackState,
        to: PlaybackState,
        context: &Context,
    ) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state != expected || !expected.can_transition_to(to) {
            return false;
        }
        *state = to;
        self.commit(expected, to, context);
        true
    }

    /// Move to `to` when the table allows it from the current state
    pub fn transition_if_allowed(&self, to: PlaybackState, context: &Context) -> bool {
        let mut state = self.state.lock().unwrap();
        let old = *state;
        if !old.can_transition_to(to) {
            return false;
        }
        *state = to;
        self.commit(old, to, context);
        true
    }

    /// Back to Idle from anywhere
    pub fn force_reset(&self, context: &Context) {
        let mut state = self.state.lock().unwrap();
        let old = *state;
        if old == PlaybackState::Idle {
            return;
        }
        *state = PlaybackState::Idle;
        self.commit(old, PlaybackState::Idle, context);
    }

    fn commit(&self, old: PlaybackState, new: PlaybackState, context: &Context) {
        debug!(from = %old, to = %new, "Playback state changed");
        self.watch_tx.send_replace(new);
        self.bus
            .publish(EngineEvent::StateChanged { old, new }, context);
    }

    /// Suspend while the state is Paused
    ///
    /// Returns false when `cancel` fired first.
    pub async fn wait_while_paused(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.watch_tx.subscribe();
        loop {
            if *rx.borrow_and_update() != PlaybackState::Paused {
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sp_core::EventKind;
    use sp_event_bus::EventBus;
    use std::sync::Arc;
    use std::time::Duration;

    fn manager() -> (PlaybackStateManager, SharedEventBus) {
        let bus = Arc::new(EventBus::new());
        (PlaybackStateManager::new(bus.clone()), bus)
    }

    #[tokio::test]
    async fn test_transitions_publish_in_order() {
        let (manager, bus) = manager();
        let mut rx = bus.subscribe(EventKind::StateChanged);
        let ctx = Context::new();

        manager.transition(PlaybackState::Loading, &ctx).unwrap();
        manager.transition(PlaybackState::Playing, &ctx).unwrap();
        manager.transition(PlaybackState::Completed, &ctx).unwrap();

        let expected = [
            (PlaybackState::Idle, PlaybackState::Loading),
            (PlaybackState::Loading, PlaybackState::Playing),
            (PlaybackState::Playing, PlaybackState::Completed),
        ];
        for (old, new) in expected {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.data, EngineEvent::StateChanged { old, new });
        }
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let (manager, _bus) = manager();
        let err = manager
            .transition(PlaybackState::Playing, &Context::new())
            .unwrap_err();
        assert_eq!(err.from, PlaybackState::Idle);
        assert_eq!(manager.current(), PlaybackState::Idle);
    }

    #[test]
    fn test_conditional_transitions() {
        let (manager, _bus) = manager();
        let ctx = Context::new();
        manager.transition(PlaybackState::Loading, &ctx).unwrap();

        assert!(!manager.transition_if(PlaybackState::Playing, PlaybackState::Waiting, &ctx));
        assert!(manager.transition_if_allowed(PlaybackState::Playing, &ctx));
        assert!(manager.transition_if(PlaybackState::Playing, PlaybackState::Waiting, &ctx));
        assert!(!manager.transition_if_allowed(PlaybackState::Completed, &ctx));
        assert_eq!(manager.current(), PlaybackState::Waiting);

        manager.force_reset(&ctx);
        assert_eq!(manager.current(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_wait_while_paused() {
        let (manager, _bus) = manager();
        let manager = Arc::new(manager);
        let ctx = Context::new();
        manager.transition(PlaybackState::Loading, &ctx).unwrap();
        manager.transition(PlaybackState::Playing, &ctx).unwrap();
        manager.transition(PlaybackState::Paused, &ctx).unwrap();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.wait_while_paused(&CancellationToken::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        manager.transition(PlaybackState::Playing, &ctx).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_while_paused_cancelled() {
        let (manager, _bus) = manager();
        let ctx = Context::new();
        manager.transition(PlaybackState::Loading, &ctx).unwrap();
        manager.transition(PlaybackState::Playing, &ctx).unwrap();
        manager.transition(PlaybackState::Paused, &ctx).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!manager.wait_while_paused(&cancel).await);
    }
}
