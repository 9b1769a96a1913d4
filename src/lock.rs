use crate::error::GpioError;
use crate::gpio::{Level, PinConfig, PinController, PinHandle};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One timed unlock of the door
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockSession {
    id: u64,
    pub started_at: Instant,
    pub duration: Duration,
}

impl LockSession {
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.started_at.elapsed())
    }
}

struct LockInner {
    /// `None` once released at shutdown
    pin: Mutex<Option<PinHandle>>,
    session: Mutex<Option<LockSession>>,
    locked_level: Level,
    next_session_id: AtomicU64,
}

/// Drives the door lock pin. The pin rests at the locked level and is only
/// held unlocked for the length of an active session.
#[derive(Clone)]
pub struct LockActuator {
    inner: Arc<LockInner>,
}

impl LockActuator {
    pub fn open(
        controller: &PinController,
        pin: u8,
        locked_level: Level,
    ) -> Result<Self, GpioError> {
        let handle = controller.acquire(PinConfig::output(pin, locked_level))?;
        Ok(Self::new(handle))
    }

    /// Take ownership of an output pin whose idle level means "locked"
    pub fn new(mut pin: PinHandle) -> Self {
        let locked_level = pin.config().idle_level;
        pin.write(locked_level);
        info!("Door lock on pin {} initialised locked", pin.pin());

        Self {
            inner: Arc::new(LockInner {
                pin: Mutex::new(Some(pin)),
                session: Mutex::new(None),
                locked_level,
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Unlock for `duration` and relock automatically afterwards.
    ///
    /// Returns `false` without touching the pin when a session is already
    /// active or the pin has been released. Must be called from within a
    /// tokio runtime.
    pub fn unlock(&self, duration: Duration) -> bool {
        let session = {
            let mut current = self.inner.session.lock();
            if let Some(active) = current.as_ref() {
                debug!(
                    "Door already unlocked ({:?} remaining), ignoring unlock",
                    active.remaining()
                );
                return false;
            }

            let mut pin_slot = self.inner.pin.lock();
            let Some(pin) = pin_slot.as_mut() else {
                warn!("Door lock released, ignoring unlock");
                return false;
            };

            let session = LockSession {
                id: self.inner.next_session_id.fetch_add(1, Ordering::Relaxed),
                started_at: Instant::now(),
                duration,
            };
            pin.write(self.inner.locked_level.inverse());
            *current = Some(session);
            session
        };

        info!("Door unlocked for {:?}", duration);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let mut current = inner.session.lock();
            match current.as_ref() {
                Some(active) if active.id == session.id => {
                    if let Some(pin) = inner.pin.lock().as_mut() {
                        pin.write(inner.locked_level);
                    }
                    *current = None;
                    info!("Door relocked");
                }
                _ => debug!("Unlock session {} already ended", session.id),
            }
        });

        true
    }

    /// Relock immediately, ending any active session
    pub fn lock_now(&self) {
        let mut current = self.inner.session.lock();
        if let Some(pin) = self.inner.pin.lock().as_mut() {
            pin.write(self.inner.locked_level);
        }
        if current.take().is_some() {
            warn!("Door relocked before its unlock session ended");
        }
    }

    /// Relock and give the pin back to the controller. Later unlocks are
    /// refused. A pending relock timer finds nothing to do.
    pub fn release(&self) {
        let mut current = self.inner.session.lock();
        let pin = self.inner.pin.lock().take();
        if let Some(mut pin) = pin {
            pin.write(self.inner.locked_level);
            if current.take().is_some() {
                warn!("Door relocked before its unlock session ended");
            }
            info!("Door lock on pin {} released", pin.pin());
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.pin.lock().is_none()
    }

    pub fn session(&self) -> Option<LockSession> {
        *self.inner.session.lock()
    }

    pub fn is_unlocked(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Current pin level, `None` after release
    pub fn pin_level(&self) -> Option<Level> {
        self.inner.pin.lock().as_ref().map(|pin| pin.read())
    }

    pub fn locked_level(&self) -> Level {
        self.inner.locked_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MockGpio;

    const LOCK_PIN: u8 = 4;

    fn lock_with_mock() -> (MockGpio, LockActuator) {
        let mock = MockGpio::new();
        let controller = PinController::new(Arc::new(mock.clone()));
        let lock = LockActuator::open(&controller, LOCK_PIN, Level::High).unwrap();
        (mock, lock)
    }

    #[tokio::test]
    async fn test_initialised_locked() {
        let (mock, lock) = lock_with_mock();

        assert_eq!(mock.level(LOCK_PIN), Some(Level::High));
        assert!(!lock.is_unlocked());
        assert_eq!(lock.pin_level(), Some(lock.locked_level()));
    }

    #[tokio::test]
    async fn test_unlock_then_relock() {
        let (mock, lock) = lock_with_mock();

        assert!(lock.unlock(Duration::from_millis(100)));
        assert_eq!(mock.level(LOCK_PIN), Some(Level::Low));
        assert!(lock.is_unlocked());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(mock.level(LOCK_PIN), Some(Level::Low));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(mock.level(LOCK_PIN), Some(Level::High));
        assert!(!lock.is_unlocked());
        assert_eq!(mock.transitions_to(LOCK_PIN, Level::High), 1);
    }

    #[tokio::test]
    async fn test_double_unlock_is_noop() {
        let (mock, lock) = lock_with_mock();

        assert!(lock.unlock(Duration::from_millis(100)));
        let first = lock.session().unwrap();
        assert!(!lock.unlock(Duration::from_secs(10)));

        // The second call neither restarts nor extends the session
        assert_eq!(lock.session(), Some(first));
        assert_eq!(mock.transitions_to(LOCK_PIN, Level::Low), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!lock.is_unlocked());
        assert_eq!(mock.transitions_to(LOCK_PIN, Level::High), 1);
        assert_eq!(mock.level(LOCK_PIN), Some(Level::High));
    }

    #[tokio::test]
    async fn test_unlock_does_not_block() {
        let (_mock, lock) = lock_with_mock();

        let started = Instant::now();
        lock.unlock(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(1));
        lock.lock_now();
    }

    #[tokio::test]
    async fn test_lock_now_ends_session() {
        let (mock, lock) = lock_with_mock();

        lock.unlock(Duration::from_millis(100));
        lock.lock_now();
        assert!(!lock.is_unlocked());
        assert_eq!(mock.level(LOCK_PIN), Some(Level::High));

        // A fresh session is not cut short by the stale timer
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(lock.unlock(Duration::from_millis(150)));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(lock.is_unlocked());
        assert_eq!(mock.level(LOCK_PIN), Some(Level::Low));
        lock.lock_now();
    }

    #[tokio::test]
    async fn test_release_relocks_and_frees_pin() {
        let mock = MockGpio::new();
        let controller = PinController::new(Arc::new(mock.clone()));
        let lock = LockActuator::open(&controller, LOCK_PIN, Level::High).unwrap();
        let pipeline_copy = lock.clone();

        assert!(lock.unlock(Duration::from_millis(100)));
        lock.release();

        // The relock timer still holds the inner state; the pin is free anyway
        assert!(!controller.is_pin_open(LOCK_PIN));
        assert!(!mock.is_open(LOCK_PIN));
        assert_eq!(mock.level(LOCK_PIN), Some(Level::High));
        assert!(pipeline_copy.is_released());
        assert!(!pipeline_copy.unlock(Duration::from_millis(100)));
        assert_eq!(pipeline_copy.pin_level(), None);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(mock.level(LOCK_PIN), Some(Level::High));
        assert_eq!(mock.transitions_to(LOCK_PIN, Level::Low), 1);
    }

    #[tokio::test]
    async fn test_active_low_lock() {
        let mock = MockGpio::new();
        let controller = PinController::new(Arc::new(mock.clone()));
        let lock = LockActuator::open(&controller, LOCK_PIN, Level::Low).unwrap();

        lock.unlock(Duration::from_millis(50));
        assert_eq!(mock.level(LOCK_PIN), Some(Level::High));
        lock.lock_now();
        assert_eq!(mock.level(LOCK_PIN), Some(Level::Low));
    }
}
