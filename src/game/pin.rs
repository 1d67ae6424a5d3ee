use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::{MAX_PIN_ATTEMPTS, PIN_LENGTH};
use crate::db::store;
use crate::error::{AppError, Result};
use crate::realtime::Realtime;
use crate::types::{ChangeAction, Player, Profile, ProfileView, Settings, Table};

/// Result of checking one entry against a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCheck {
    Accepted,
    Rejected { attempts_left: i64 },
    /// Already locked, or locked by this attempt.
    Locked,
}

pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == PIN_LENGTH && pin.chars().all(|c| c.is_ascii_digit())
}

/// Apply one PIN entry to the profile's counters. Returns the verdict and
/// whether the profile changed.
pub fn register_attempt(profile: &mut Profile, entered: &str) -> (PinCheck, bool) {
    if profile.is_locked {
        return (PinCheck::Locked, false);
    }

    if entered == profile.pin {
        let changed = profile.failed_attempts != 0;
        profile.failed_attempts = 0;
        return (PinCheck::Accepted, changed);
    }

    profile.failed_attempts = (profile.failed_attempts + 1).min(MAX_PIN_ATTEMPTS);
    if profile.failed_attempts >= MAX_PIN_ATTEMPTS {
        profile.is_locked = true;
        (PinCheck::Locked, true)
    } else {
        (
            PinCheck::Rejected {
                attempts_left: MAX_PIN_ATTEMPTS - profile.failed_attempts,
            },
            true,
        )
    }
}

/// Verify a player's PIN, persisting the counter and lock flag.
/// With PIN entry disabled every entry is accepted and nothing is recorded.
pub async fn verify(
    pool: &SqlitePool,
    realtime: &Realtime,
    settings: &Settings,
    player: Player,
    entered: &str,
) -> Result<ProfileView> {
    let mut profile = store::get_profile(pool, player).await?;
    if !settings.pin_entry_enabled {
        return Ok(ProfileView::from(&profile));
    }

    let (check, changed) = register_attempt(&mut profile, entered);
    if changed {
        store::save_profile_lock_state(pool, &profile).await?;
        realtime.publish(Table::Profiles, ChangeAction::Update, &ProfileView::from(&profile));
    }

    match check {
        PinCheck::Accepted => Ok(ProfileView::from(&profile)),
        PinCheck::Rejected { attempts_left } => {
            warn!(%player, attempts_left, "Wrong PIN");
            Err(AppError::Forbidden(format!(
                "incorrect PIN, {attempts_left} attempt(s) left"
            )))
        }
        PinCheck::Locked => {
            if changed {
                warn!(%player, "Profile locked after {MAX_PIN_ATTEMPTS} wrong PINs");
            }
            Err(AppError::Locked(format!(
                "{player} is locked, ask an admin to unlock"
            )))
        }
    }
}

/// Admin unlock: clears the counter and the lock flag.
pub async fn unlock(pool: &SqlitePool, realtime: &Realtime, player: Player) -> Result<ProfileView> {
    let mut profile = store::get_profile(pool, player).await?;
    profile.failed_attempts = 0;
    profile.is_locked = false;
    store::save_profile_lock_state(pool, &profile).await?;

    let view = ProfileView::from(&profile);
    realtime.publish(Table::Profiles, ChangeAction::Update, &view);
    info!(%player, "Profile unlocked");
    Ok(view)
}

/// Admin PIN change. Does not touch the lock state.
pub async fn change_pin(pool: &SqlitePool, player: Player, new_pin: &str) -> Result<()> {
    if !is_valid_pin(new_pin) {
        return Err(AppError::BadRequest(format!("PIN must be {PIN_LENGTH} digits")));
    }
    store::set_pin(pool, player, new_pin).await?;
    info!(%player, "PIN changed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn profile(failed: i64) -> Profile {
        Profile {
            player: Player::Ayaan,
            pin: "123456".to_string(),
            failed_attempts: failed,
            is_locked: false,
        }
    }

    #[test]
    fn correct_pin_resets_counter() {
        let mut p = profile(2);
        assert_eq!(register_attempt(&mut p, "123456"), (PinCheck::Accepted, true));
        assert_eq!(p.failed_attempts, 0);
    }

    #[test]
    fn third_failure_locks() {
        let mut p = profile(0);
        assert_eq!(register_attempt(&mut p, "000000").0, PinCheck::Rejected { attempts_left: 2 });
        assert_eq!(register_attempt(&mut p, "000000").0, PinCheck::Rejected { attempts_left: 1 });
        assert!(!p.is_locked);
        assert_eq!(register_attempt(&mut p, "000000").0, PinCheck::Locked);
        assert!(p.is_locked);
        assert_eq!(p.failed_attempts, 3);
    }

    #[test]
    fn locked_rejects_correct_pin() {
        let mut p = profile(3);
        p.is_locked = true;
        assert_eq!(register_attempt(&mut p, "123456"), (PinCheck::Locked, false));
        assert!(p.is_locked);
    }

    #[test]
    fn pin_format() {
        assert!(is_valid_pin("004211"));
        assert!(!is_valid_pin("12345"));
        assert!(!is_valid_pin("12345a"));
    }

    #[tokio::test]
    async fn two_failures_then_wrong_locks_until_unlock() {
        let pool = test_pool().await;
        store::ensure_profiles(&pool, "123456").await.unwrap();
        let rt = Realtime::new(16);
        let settings = Settings::default();

        for _ in 0..2 {
            let err = verify(&pool, &rt, &settings, Player::Riyaan, "999999").await.unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)));
        }
        let err = verify(&pool, &rt, &settings, Player::Riyaan, "999999").await.unwrap_err();
        assert!(matches!(err, AppError::Locked(_)));

        let err = verify(&pool, &rt, &settings, Player::Riyaan, "123456").await.unwrap_err();
        assert!(matches!(err, AppError::Locked(_)));

        let view = unlock(&pool, &rt, Player::Riyaan).await.unwrap();
        assert!(!view.is_locked);
        assert_eq!(view.attempts_left, 3);
        assert!(verify(&pool, &rt, &settings, Player::Riyaan, "123456").await.is_ok());
    }

    #[tokio::test]
    async fn disabled_pin_entry_skips_check() {
        let pool = test_pool().await;
        store::ensure_profiles(&pool, "123456").await.unwrap();
        let settings = Settings { pin_entry_enabled: false, ..Settings::default() };

        let view = verify(&pool, &Realtime::new(4), &settings, Player::Ayaan, "nope").await.unwrap();
        assert_eq!(view.failed_attempts, 0);
    }

    #[tokio::test]
    async fn lock_change_is_published() {
        let pool = test_pool().await;
        store::ensure_profiles(&pool, "123456").await.unwrap();
        let rt = Realtime::new(16);
        let mut rx = rt.subscribe();

        let _ = verify(&pool, &rt, &Settings::default(), Player::Ayaan, "000000").await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.table, Table::Profiles);
        assert_eq!(ev.record["failed_attempts"], 1);
    }
}
