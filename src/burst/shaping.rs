//! Adaptive timing and sizing for the burst loop.
//!
//! Pure calculations over the burst configuration and the observed
//! network state; the buffer applies them under its lock. All outputs
//! are clamped back into the configured bounds, so a misbehaving input
//! can never push the shape outside the cover-traffic envelope.

use rand::rngs::StdRng;
use rand::Rng;

use super::{BurstConfig, BurstMetrics};

/// Multiplicative interval factor from the observed conditions. The
/// factors apply in a fixed order (latency, loss, bandwidth, buffer
/// fill) and are blended against the previous factor when the change
/// is small, which keeps the cadence from visibly hunting.
pub fn interval_factor(
    config: &BurstConfig,
    metrics: &BurstMetrics,
    buffered: usize,
    last_factor: f64,
) -> f64 {
    let mut factor = 1.0f64;
    let target = config.target_latency_ms;
    let observed = metrics.observed_latency_ms;

    if observed > 0.0 && target > 0.0 {
        if observed > target * 1.5 {
            // Far over budget: accelerate quadratically to drain.
            let r = target / observed;
            factor *= r * r;
        } else if observed > target {
            factor *= target / observed;
        } else if observed < target * 0.5 {
            // Plenty of headroom: decelerate, at most 1.5x.
            factor *= (0.8 * target / observed).min(1.5);
        }
    }

    let loss = metrics.packet_loss_rate;
    if loss > 0.01 {
        factor *= 1.0 + (loss * 100.0).log10() * 0.25;
    }

    let bw = metrics.bandwidth_estimate_bps;
    if bw > 0.0 {
        if bw < 1_000_000.0 {
            factor *= (1_000_000.0 / bw).min(1.5);
        } else if bw > 10_000_000.0 {
            factor *= (10_000_000.0 / bw).max(0.7);
        }
    }

    if config.max_buffer_bytes > 0 {
        let fill = buffered as f64 / config.max_buffer_bytes as f64;
        if fill > 0.8 {
            factor *= (1.0 - (fill - 0.8) * 2.5).max(0.5);
        } else if fill < 0.2 {
            factor *= 1.0 + (0.2 - fill) * 1.25;
        }
    }

    if (factor - last_factor).abs() < 0.15 {
        factor = 0.7 * last_factor + 0.3 * factor;
    }
    factor
}

/// Next burst interval in milliseconds, clamped to the configured
/// bounds. `factor` comes from [`interval_factor`] when adaptive
/// timing is on, else 1.0.
pub fn burst_interval_ms(config: &BurstConfig, factor: f64, rng: &mut StdRng) -> u64 {
    let base = (config.min_interval_ms + config.max_interval_ms) as f64 / 2.0;
    let mut interval = base * factor;

    if config.mimic_realistic_patterns {
        // Bimodal jitter: mostly small wobble, occasional spike the way
        // real applications hiccup.
        let jitter = if rng.gen_range(0..10) < 9 {
            let amp = config.jitter_factor.max(0.0);
            rng.gen_range(-amp..=amp)
        } else {
            rng.gen_range(-0.3..=0.4)
        };
        interval *= 1.0 + jitter;
    }

    (interval.round() as u64).clamp(config.min_interval_ms, config.max_interval_ms)
}

/// Target size for the next burst in bytes, clamped to the configured
/// bounds.
pub fn optimal_burst_size(config: &BurstConfig, metrics: &BurstMetrics, interval_ms: u64) -> usize {
    let mut size = config.optimal_size as f64;

    if config.adaptive_sizing {
        let loss = metrics.packet_loss_rate;
        if loss > 0.0 {
            size *= 0.5f64.powf(loss * 10.0);
        }

        let bw_bytes = metrics.bandwidth_estimate_bps / 8.0;
        if bw_bytes > 0.0 {
            let target = config.target_latency_ms;
            let observed = metrics.observed_latency_ms;
            let utilization = if loss > 0.05 || (target > 0.0 && observed > target * 2.0) {
                0.6
            } else if loss < 0.01 && observed > 0.0 && observed < target * 0.8 {
                0.9
            } else {
                0.8
            };
            let ceiling = bw_bytes * (interval_ms as f64 / 1000.0) * utilization;
            size = size.min(ceiling);
        }

        let target = config.target_latency_ms;
        let observed = metrics.observed_latency_ms;
        if observed > 0.0 && target > 0.0 {
            if observed > target * 1.2 {
                size *= target / observed;
            } else if observed < target * 0.8 {
                size *= (target / observed).min(1.2);
            }
        }
    }

    (size.round() as usize).clamp(config.min_size, config.max_size)
}

/// Slow feedback loop: walks the interval bounds and the optimal size
/// toward the observed conditions and refreshes the adaptation score.
pub fn adapt_to_network_conditions(config: &mut BurstConfig, metrics: &mut BurstMetrics) {
    let target = config.target_latency_ms;
    let observed = metrics.observed_latency_ms;

    if target > 0.0 && observed > target * 1.5 {
        config.min_interval_ms = ((config.min_interval_ms as f64 * 0.9) as u64).max(10);
        config.max_interval_ms = ((config.max_interval_ms as f64 * 0.9) as u64).max(50);
    } else if target > 0.0 && observed > 0.0 && observed < target * 0.7 {
        config.min_interval_ms = ((config.min_interval_ms as f64 * 1.1) as u64).min(200);
        config.max_interval_ms = ((config.max_interval_ms as f64 * 1.1) as u64).min(500);
    }

    let loss = metrics.packet_loss_rate;
    if loss > 0.05 {
        config.optimal_size =
            ((config.optimal_size as f64 * 0.9) as usize).max(config.min_size);
    } else if loss < 0.01 && metrics.bandwidth_estimate_bps > 0.0 {
        let bw_bytes = metrics.bandwidth_estimate_bps / 8.0;
        let per_burst = bw_bytes * (metrics.average_burst_interval_ms / 1000.0) * 0.8;
        if per_burst > config.optimal_size as f64 {
            let stepped = (config.optimal_size as f64 * 1.1).min(per_burst);
            config.optimal_size = (stepped as usize).min(config.max_size);
        }
    }

    let latency_score = if observed > 0.0 && target > 0.0 {
        (target / observed).min(1.0)
    } else {
        1.0
    };
    let loss_score = 1.0 - (loss / 0.1).min(1.0);
    metrics.adaptation_score = 0.6 * latency_score + 0.4 * loss_score;
}
