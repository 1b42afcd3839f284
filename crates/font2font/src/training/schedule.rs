//! Step-decay learning rate schedule.

/// Learning rate in effect during `epoch` (0-based).
///
/// The rate is halved at every epoch where `(epoch + 1) % schedule == 0` and
/// never drops below `min_lr`, i.e. `max(base_lr / 2^k, min_lr)` with
/// `k = (epoch + 1) / schedule`. A zero `schedule` disables decay.
pub fn learning_rate_at(base_lr: f64, schedule: usize, min_lr: f64, epoch: usize) -> f64 {
    if schedule == 0 {
        return base_lr;
    }
    let halvings = ((epoch + 1) / schedule).min(i32::MAX as usize) as i32;
    (base_lr / 2f64.powi(halvings)).max(min_lr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_over_25_epochs() {
        let rates: Vec<f64> = (0..25).map(|e| learning_rate_at(0.0002, 10, 0.00002, e)).collect();
        for (epoch, rate) in rates.iter().enumerate() {
            let expected = match epoch {
                0..=8 => 0.0002,
                9..=18 => 0.0001,
                _ => 0.00005,
            };
            assert!((rate - expected).abs() < 1e-15, "epoch {epoch}: {rate} != {expected}");
        }
    }

    #[test]
    fn test_floor_applies_once_halving_reaches_it() {
        // 0.0002 / 2^2 = 0.00005 <= 0.00006, so the floor takes over at k = 2.
        let floor = 0.00006;
        assert!((learning_rate_at(0.0002, 10, floor, 18) - 0.0001).abs() < 1e-15);
        for epoch in 19..25 {
            assert!((learning_rate_at(0.0002, 10, floor, epoch) - floor).abs() < 1e-15);
        }
    }

    #[test]
    fn test_closed_form_matches_iterated_halving() {
        let (base, schedule, floor): (f64, usize, f64) = (0.002, 3, 1e-5);
        let mut lr = base;
        for epoch in 0..40 {
            if (epoch + 1) % schedule == 0 {
                lr = (lr / 2.0).max(floor);
            }
            assert!((lr - learning_rate_at(base, schedule, floor, epoch)).abs() < 1e-15);
        }
    }

    #[test]
    fn test_zero_schedule_disables_decay() {
        assert_eq!(learning_rate_at(0.01, 0, 0.0, 100), 0.01);
    }
}
