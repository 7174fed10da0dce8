use rand::Rng;
use serde::{Deserialize, Serialize};
use zvt_core::constants::INJECTABLE_RESULT_CODES;

/// Failure injection for payment commands.
///
/// | `enabled` | `forced_code` | Behaviour                                  |
/// |-----------|---------------|--------------------------------------------|
/// | `false`   | any           | never fails                                |
/// | `true`    | `Some(code)`  | every payment fails with `code`            |
/// | `true`    | `None`        | fails `percentage`% of calls, random code  |
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPolicy {
    #[serde(default)]
    pub enabled: bool,
    /// Failure probability in percent, 0..=100.
    #[serde(default)]
    pub percentage: u8,
    #[serde(default)]
    pub forced_code: Option<u8>,
}

impl ErrorPolicy {
    pub fn forced(code: u8) -> Self {
        ErrorPolicy {
            enabled: true,
            percentage: 0,
            forced_code: Some(code),
        }
    }

    pub fn percentage(percentage: u8) -> Self {
        ErrorPolicy {
            enabled: true,
            percentage: percentage.min(100),
            forced_code: None,
        }
    }

    /// Decide whether this call fails, and with which result code.
    pub fn draw(&self) -> Option<u8> {
        self.draw_with(&mut rand::thread_rng())
    }

    /// [`ErrorPolicy::draw`] with a caller-provided random source.
    pub fn draw_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u8> {
        if !self.enabled {
            return None;
        }
        if let Some(code) = self.forced_code {
            return Some(code);
        }
        if self.percentage == 0 || rng.gen_range(0..100u8) >= self.percentage {
            return None;
        }
        let index = rng.gen_range(0..INJECTABLE_RESULT_CODES.len());
        Some(INJECTABLE_RESULT_CODES[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn test_disabled_never_fails() {
        let policy = ErrorPolicy {
            enabled: false,
            percentage: 100,
            forced_code: Some(0x64),
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert!((0..100).all(|_| policy.draw_with(&mut rng).is_none()));
    }

    #[test]
    fn test_forced_code_always_fails() {
        let policy = ErrorPolicy::forced(0x64);
        assert_eq!(policy.draw(), Some(0x64));
        assert_eq!(policy.draw(), Some(0x64));
    }

    #[test]
    fn test_full_percentage_always_fails_with_injectable_code() {
        let policy = ErrorPolicy::percentage(100);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let code = policy.draw_with(&mut rng).unwrap();
            assert!(INJECTABLE_RESULT_CODES.contains(&code));
        }
    }

    #[test]
    fn test_zero_percentage_never_fails() {
        let policy = ErrorPolicy::percentage(0);
        let mut rng = StdRng::seed_from_u64(3);
        assert!((0..200).all(|_| policy.draw_with(&mut rng).is_none()));
    }

    #[test]
    fn test_partial_percentage_is_roughly_proportional() {
        let policy = ErrorPolicy::percentage(30);
        let mut rng = StdRng::seed_from_u64(42);
        let failures = (0..10_000)
            .filter(|_| policy.draw_with(&mut rng).is_some())
            .count();
        assert!((2_500..3_500).contains(&failures), "failures = {failures}");
    }
}
