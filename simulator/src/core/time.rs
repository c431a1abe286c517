//! Time management for the simulation
//!
//! The simulation operates in discrete ticks. Multiple ticks form a day.
//! This module provides deterministic time advancement.

use serde::{Deserialize, Serialize};

/// The atomic time unit of the simulator, counted from 0.
pub type Tick = u64;

/// A business day index: `tick / ticks_per_day`.
pub type Day = u64;

/// Manages simulation time in discrete ticks and days
///
/// # Example
/// ```
/// use rtgs_sim_core::core::time::TimeManager;
///
/// let mut time = TimeManager::new(100, 2); // 100 ticks per day, 2 days
/// assert_eq!(time.current_tick(), 0);
/// assert_eq!(time.current_day(), 0);
///
/// time.advance_tick();
/// assert_eq!(time.current_tick(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeManager {
    /// Total ticks elapsed since simulation start
    current_tick: Tick,
    /// Number of ticks in one day
    ticks_per_day: u64,
    /// Total simulation horizon in days
    num_days: u64,
}

impl TimeManager {
    /// Create a new TimeManager
    ///
    /// # Panics
    /// Panics if `ticks_per_day` or `num_days` is zero.
    pub fn new(ticks_per_day: u64, num_days: u64) -> Self {
        assert!(ticks_per_day > 0, "ticks_per_day must be positive");
        assert!(num_days > 0, "num_days must be positive");
        Self {
            current_tick: 0,
            ticks_per_day,
            num_days,
        }
    }

    /// Advance time by one tick
    pub fn advance_tick(&mut self) {
        self.current_tick += 1;
    }

    /// Get the current tick (total ticks since start)
    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    /// Get the current day (0-indexed)
    pub fn current_day(&self) -> Day {
        self.current_tick / self.ticks_per_day
    }

    /// Get the tick within the current day (0-indexed)
    pub fn tick_in_day(&self) -> u64 {
        self.current_tick % self.ticks_per_day
    }

    /// Check if the current tick is the first tick of a day
    pub fn is_start_of_day(&self) -> bool {
        self.tick_in_day() == 0
    }

    /// Check if the current tick is the last tick of the day
    pub fn is_end_of_day(&self) -> bool {
        self.tick_in_day() == self.ticks_per_day - 1
    }

    /// Ticks remaining in the current day, excluding the current tick
    pub fn ticks_remaining_in_day(&self) -> u64 {
        self.ticks_per_day - self.tick_in_day() - 1
    }

    /// Ticks until the next day boundary, including the current tick
    pub fn ticks_to_eod(&self) -> u64 {
        self.ticks_per_day - self.tick_in_day()
    }

    /// Get ticks per day
    pub fn ticks_per_day(&self) -> u64 {
        self.ticks_per_day
    }

    /// Get the configured number of days
    pub fn num_days(&self) -> u64 {
        self.num_days
    }

    /// First tick past the end of the simulation
    pub fn horizon_tick(&self) -> Tick {
        self.ticks_per_day * self.num_days
    }

    /// Check if the simulation horizon has been reached
    pub fn is_finished(&self) -> bool {
        self.current_tick >= self.horizon_tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "ticks_per_day must be positive")]
    fn test_zero_ticks_per_day_panics() {
        TimeManager::new(0, 1);
    }

    #[test]
    fn test_day_boundaries() {
        let mut time = TimeManager::new(4, 2);
        assert!(time.is_start_of_day());
        assert!(!time.is_end_of_day());
        assert_eq!(time.ticks_to_eod(), 4);

        for _ in 0..3 {
            time.advance_tick();
        }
        assert_eq!(time.tick_in_day(), 3);
        assert!(time.is_end_of_day());
        assert_eq!(time.ticks_remaining_in_day(), 0);

        time.advance_tick();
        assert_eq!(time.current_day(), 1);
        assert!(time.is_start_of_day());
    }

    #[test]
    fn test_horizon() {
        let mut time = TimeManager::new(3, 2);
        assert_eq!(time.horizon_tick(), 6);
        for _ in 0..6 {
            assert!(!time.is_finished());
            time.advance_tick();
        }
        assert!(time.is_finished());
    }
}
