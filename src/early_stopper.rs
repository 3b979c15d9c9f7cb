//! Streaming termination criterion: stop once a scalar stops improving.

/// Tracks the running minimum of a streaming scalar and signals termination
/// once `max_stale_iterations` updates in a row fail to improve on it.
///
/// "No change" and "got worse" are treated identically as stale -- this is
/// intentional, not an oversight.
pub struct EarlyStopper {
    max_stale_iterations: u32,
    tolerance: f64,
    min: Option<f64>,
    stale: u32,
}

impl EarlyStopper {
    pub fn new(max_stale_iterations: u32, tolerance: f64) -> Self {
        EarlyStopper {
            max_stale_iterations,
            tolerance,
            min: None,
            stale: 0,
        }
    }

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() <= tolerance
    }

    /// Feeds a new observation. Returns `true` once the caller should stop.
    pub fn update(&mut self, value: f64) -> bool {
        match self.min {
            None => {
                self.min = Some(value);
                self.stale = 0;
            }
            Some(m) => {
                let improved = value < m && !Self::close(value, m, self.tolerance);
                if improved {
                    self.min = Some(value);
                    self.stale = 0;
                } else {
                    self.stale += 1;
                }
            }
        }
        self.stale >= self.max_stale_iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_max_stale_updates_are_all_within_tolerance() {
        // Every update after the first is within `tolerance` of the running
        // minimum, so none of them count as an improvement: staleness climbs
        // on every step and fires as soon as it reaches max_stale_iterations.
        let mut stopper = EarlyStopper::new(3, 0.1);
        let signals: Vec<bool> = [1.0, 0.95, 0.96, 0.95]
            .into_iter()
            .map(|v| stopper.update(v))
            .collect();
        assert_eq!(signals, vec![false, false, false, true]);
    }

    #[test]
    fn improvement_resets_staleness() {
        let mut stopper = EarlyStopper::new(2, 0.01);
        assert!(!stopper.update(10.0));
        assert!(!stopper.update(9.99)); // within tolerance: stale 1
        assert!(!stopper.update(5.0)); // real improvement: resets
        assert!(!stopper.update(5.0)); // stale 1
        assert!(stopper.update(5.0)); // stale 2: fires
    }
}
