/// Store-ordered child keys
///
/// 8 characters of millisecond time followed by 12 random characters, over
/// an alphabet whose ASCII order matches its index order, so lexicographic
/// key order is generation order. Within the same millisecond the random
/// tail is incremented instead of regenerated.
use rand::Rng;
use std::sync::Mutex;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

pub const PUSH_ID_LEN: usize = TIME_CHARS + RANDOM_CHARS;

#[derive(Default)]
struct GeneratorState {
    last_millis: i64,
    last_random: [u8; RANDOM_CHARS],
}

/// Monotonic push id generator
#[derive(Default)]
pub struct PushIdGenerator {
    state: Mutex<GeneratorState>,
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id using the current wall clock
    pub fn next_id(&self) -> String {
        self.next_id_at(chrono::Utc::now().timestamp_millis())
    }

    /// Next id for the given time; never goes backwards even if `millis` does
    pub fn next_id_at(&self, millis: i64) -> String {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let millis = millis.max(state.last_millis);
        if millis == state.last_millis && state.last_millis != 0 {
            increment(&mut state.last_random);
        } else {
            let mut rng = rand::thread_rng();
            for digit in state.last_random.iter_mut() {
                *digit = rng.gen_range(0..64);
            }
        }
        state.last_millis = millis;

        let mut id = String::with_capacity(PUSH_ID_LEN);
        let mut time = [0u8; TIME_CHARS];
        let mut remaining = millis.max(0) as u64;
        for slot in time.iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }
        id.extend(time.iter().map(|&c| c as char));
        id.extend(state.last_random.iter().map(|&d| PUSH_CHARS[d as usize] as char));
        id
    }
}

/// Add one to a base-64 digit string, carrying leftwards
fn increment(digits: &mut [u8; RANDOM_CHARS]) {
    for digit in digits.iter_mut().rev() {
        if *digit == 63 {
            *digit = 0;
        } else {
            *digit += 1;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_sort_in_generation_order() {
        let generator = PushIdGenerator::new();
        let mut ids = Vec::new();
        for millis in [1_000, 1_000, 1_000, 1_001, 5_000_000, 5_000_000] {
            ids.push(generator.next_id_at(millis));
        }
        assert!(ids.iter().all(|id| id.len() == PUSH_ID_LEN));
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[test]
    fn test_clock_going_backwards_stays_monotonic() {
        let generator = PushIdGenerator::new();
        let first = generator.next_id_at(10_000);
        let second = generator.next_id_at(9_000);
        assert!(second > first);
    }

    #[test]
    fn test_increment_carries() {
        let mut digits = [0u8; RANDOM_CHARS];
        digits[RANDOM_CHARS - 1] = 63;
        increment(&mut digits);
        assert_eq!(digits[RANDOM_CHARS - 1], 0);
        assert_eq!(digits[RANDOM_CHARS - 2], 1);
    }
}
